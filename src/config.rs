use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::util::read_json_file;

pub const DEFAULT_ALIGNED_ROW_CAP: usize = 200;
pub const DEFAULT_SIGNIFICANCE_ALPHA: f64 = 0.05;
pub const DEFAULT_LARGE_EFFECT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_HISTOGRAM_MAX_EDGES: usize = 10;
pub const DEFAULT_WORKERS: usize = 2;

/// Settings shared by the orchestrator and the worker pool.
///
/// Built once at startup (file, then CLI overrides) and passed down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisSettings {
    pub aligned_row_cap: usize,
    pub significance_alpha: f64,
    pub large_effect_threshold: f64,
    pub confidence_level: f64,
    pub histogram_max_edges: usize,
    pub workers: usize,
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            aligned_row_cap: DEFAULT_ALIGNED_ROW_CAP,
            significance_alpha: DEFAULT_SIGNIFICANCE_ALPHA,
            large_effect_threshold: DEFAULT_LARGE_EFFECT_THRESHOLD,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            histogram_max_edges: DEFAULT_HISTOGRAM_MAX_EDGES,
            workers: DEFAULT_WORKERS,
            tokenizer_path: None,
        }
    }
}

impl AnalysisSettings {
    /// Loads settings from `explicit_path`, or from `default_path` when it exists,
    /// falling back to built-in defaults.
    pub fn load(explicit_path: Option<&Path>, default_path: &Path) -> Result<Self> {
        let settings = match explicit_path {
            Some(path) => read_json_file::<Self>(path)?,
            None if default_path.exists() => read_json_file::<Self>(default_path)?,
            None => Self::default(),
        };

        settings.validate()?;
        info!(
            aligned_row_cap = settings.aligned_row_cap,
            significance_alpha = settings.significance_alpha,
            large_effect_threshold = settings.large_effect_threshold,
            confidence_level = settings.confidence_level,
            workers = settings.workers,
            "analysis settings resolved"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.significance_alpha > 0.0 && self.significance_alpha < 1.0) {
            bail!(
                "significance_alpha must be in (0, 1), got {}",
                self.significance_alpha
            );
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            bail!(
                "confidence_level must be in (0, 1), got {}",
                self.confidence_level
            );
        }
        if !self.large_effect_threshold.is_finite() || self.large_effect_threshold < 0.0 {
            bail!(
                "large_effect_threshold must be a non-negative number, got {}",
                self.large_effect_threshold
            );
        }
        if self.histogram_max_edges < 2 {
            bail!(
                "histogram_max_edges must be at least 2, got {}",
                self.histogram_max_edges
            );
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_file_keeps_defaults_for_missing_fields() {
        let raw = r#"{ "aligned_row_cap": 25, "workers": 4 }"#;
        let settings: AnalysisSettings =
            serde_json::from_str(raw).expect("partial settings should deserialize");

        assert_eq!(settings.aligned_row_cap, 25);
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.significance_alpha, DEFAULT_SIGNIFICANCE_ALPHA);
        assert_eq!(settings.histogram_max_edges, DEFAULT_HISTOGRAM_MAX_EDGES);
        assert!(settings.tokenizer_path.is_none());
    }

    #[test]
    fn unknown_settings_keys_are_rejected() {
        let raw = r#"{ "significance": 0.01 }"#;
        assert!(serde_json::from_str::<AnalysisSettings>(raw).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_levels() {
        let settings = AnalysisSettings {
            confidence_level: 1.0,
            ..AnalysisSettings::default()
        };
        let error = settings.validate().expect_err("confidence level 1.0 is invalid");
        assert!(error.to_string().contains("confidence_level"));

        let settings = AnalysisSettings {
            workers: 0,
            ..AnalysisSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_without_files_uses_defaults() {
        let missing = std::env::temp_dir().join("oedipus-settings-that-do-not-exist.json");
        let settings = AnalysisSettings::load(None, &missing).expect("defaults should load");
        assert_eq!(settings, AnalysisSettings::default());
    }
}
