//! Comparison analysis core: alignment, per-example metric extraction,
//! pairwise significance testing, information-theoretic measures and
//! insight generation. Everything here is pure; persistence and scheduling
//! live in the orchestrator.

pub mod alignment;
pub mod extract;
pub mod information;
pub mod insights;
pub mod stats;
pub mod tokens;
