use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::alignment::AlignmentResult;
use crate::analysis::extract::LengthProfiles;
use crate::analysis::information::{DiversityMetrics, InformationMetrics};
use crate::analysis::stats::{StatisticalMetric, SummaryStats};

pub const DEFAULT_ALIGNMENT_KEY: &str = "prompt_id";

/// prompt id -> prompt text
pub type PromptMap = BTreeMap<String, String>;

/// prompt id -> completions, in upload order
pub type CompletionMap = BTreeMap<String, Vec<String>>;

/// metric name -> summary, for one dataset
pub type DatasetSummary = BTreeMap<String, SummaryStats>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptSet {
    pub id: String,
    pub name: String,
    pub prompts: PromptMap,
    pub sha256: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionSet {
    pub id: String,
    pub name: String,
    pub prompt_set_id: String,
    pub completions: CompletionMap,
    pub sha256: String,
    pub created_at: String,
}

impl CompletionSet {
    pub fn total_completions(&self) -> usize {
        self.completions.values().map(Vec::len).sum()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ComparisonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => bail!("unknown comparison status: {other}"),
        }
    }
}

/// Liveness marker published while a comparison is running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressMarker {
    pub step: String,
    pub message: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetOverview {
    pub total_prompts: usize,
    pub total_completions: usize,
    pub unique_prompts: usize,
    pub unique_completions: usize,
    pub answered_prompts: usize,
    pub avg_completions_per_prompt: f64,
}

/// Results bag owned by one comparison.
///
/// Alignment is filled at creation; everything else is written by the
/// orchestrator while the comparison runs. Per-dataset maps are keyed by
/// completion set name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComparisonResults {
    pub alignment: Option<AlignmentResult>,
    pub metrics: Vec<StatisticalMetric>,
    pub summary: BTreeMap<String, DatasetSummary>,
    pub information: BTreeMap<String, InformationMetrics>,
    pub diversity: BTreeMap<String, DiversityMetrics>,
    pub length_profiles: BTreeMap<String, LengthProfiles>,
    pub overview: BTreeMap<String, DatasetOverview>,
    pub insights: Vec<String>,
    pub progress: Option<ProgressMarker>,
    pub error: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comparison {
    pub id: String,
    pub name: String,
    pub prompt_set_id: String,
    pub completion_set_ids: Vec<String>,
    pub alignment_key: String,
    pub config: BTreeMap<String, Value>,
    pub status: ComparisonStatus,
    pub results: ComparisonResults,
    pub created_at: String,
    pub updated_at: String,
}
