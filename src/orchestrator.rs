//! Drives one comparison from creation to a terminal state.
//!
//! Creation validates the request, aligns synchronously and stores the
//! comparison as `pending`. `run_analysis` claims the comparison through the
//! store's `pending -> running` gate, publishes a progress marker before each
//! step and finishes with a single write of the terminal status.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::alignment::align_completion_sets;
use crate::analysis::extract::{
    MetricVectors, dataset_overview, extract_metric_vectors, length_profiles,
};
use crate::analysis::information::{diversity_metrics, mutual_information};
use crate::analysis::insights::{DatasetSize, InsightThresholds, generate_insights};
use crate::analysis::stats::{compare_datasets, summary_statistics};
use crate::analysis::tokens::TokenCounter;
use crate::config::AnalysisSettings;
use crate::error::AnalysisError;
use crate::model::{
    Comparison, ComparisonResults, ComparisonStatus, CompletionSet, DEFAULT_ALIGNMENT_KEY,
    ProgressMarker, PromptSet,
};
use crate::store::ComparisonStore;
use crate::util::now_utc_string;

#[derive(Debug, Clone, Default)]
pub struct NewComparison {
    pub name: String,
    pub prompt_set_id: String,
    pub completion_set_ids: Vec<String>,
    /// Defaults to `prompt_id`.
    pub alignment_key: Option<String>,
    pub config: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Loading,
    Metrics,
    Statistics,
    Information,
    Insights,
}

impl Step {
    fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Metrics => "metrics",
            Self::Statistics => "statistics",
            Self::Information => "information",
            Self::Insights => "insights",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Loading => "Loading prompt and completion sets",
            Self::Metrics => "Extracting per-example metrics",
            Self::Statistics => "Running pairwise significance tests",
            Self::Information => "Computing entropy and diversity measures",
            Self::Insights => "Generating insights",
        }
    }
}

pub struct Orchestrator<S> {
    store: S,
    settings: AnalysisSettings,
    tokens: TokenCounter,
}

impl<S: ComparisonStore> Orchestrator<S> {
    pub fn new(store: S, settings: AnalysisSettings) -> Self {
        let tokens = TokenCounter::load(settings.tokenizer_path.as_deref());
        Self {
            store,
            settings,
            tokens,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validates the request, computes the alignment and stores the comparison
    /// as `pending`. Nothing is persisted when validation fails.
    pub fn create_comparison(&self, request: NewComparison) -> Result<Comparison, AnalysisError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(rejected("comparison name must not be empty"));
        }
        if request.completion_set_ids.len() < 2 {
            return Err(rejected(format!(
                "a comparison needs at least 2 completion sets, got {}",
                request.completion_set_ids.len()
            )));
        }
        let mut seen_ids = HashSet::new();
        for completion_set_id in &request.completion_set_ids {
            if !seen_ids.insert(completion_set_id.as_str()) {
                return Err(rejected(format!(
                    "completion set {completion_set_id} is listed more than once"
                )));
            }
        }

        let Some(prompt_set) = self.store.prompt_set(&request.prompt_set_id)? else {
            return Err(rejected(format!(
                "prompt set {} does not exist",
                request.prompt_set_id
            )));
        };

        let completion_sets = self.store.completion_sets(&request.completion_set_ids)?;
        if completion_sets.len() != request.completion_set_ids.len() {
            let found = completion_sets
                .iter()
                .map(|set| set.id.as_str())
                .collect::<HashSet<&str>>();
            let missing = request
                .completion_set_ids
                .iter()
                .filter(|id| !found.contains(id.as_str()))
                .cloned()
                .collect::<Vec<String>>();
            return Err(rejected(format!(
                "completion sets do not exist: {}",
                missing.join(", ")
            )));
        }

        let mut seen_names = HashSet::new();
        for set in &completion_sets {
            if set.prompt_set_id != prompt_set.id {
                return Err(rejected(format!(
                    "completion set {} belongs to prompt set {}, not {}",
                    set.id, set.prompt_set_id, prompt_set.id
                )));
            }
            if !seen_names.insert(set.name.as_str()) {
                return Err(rejected(format!(
                    "completion set name {:?} appears more than once",
                    set.name
                )));
            }
        }

        let alignment = align_completion_sets(
            &prompt_set.prompts,
            &completion_sets,
            self.settings.aligned_row_cap,
        );
        let now = now_utc_string();
        let comparison = Comparison {
            id: format!("cmp-{}", Uuid::new_v4()),
            name: name.to_string(),
            prompt_set_id: prompt_set.id.clone(),
            completion_set_ids: request.completion_set_ids,
            alignment_key: request
                .alignment_key
                .unwrap_or_else(|| DEFAULT_ALIGNMENT_KEY.to_string()),
            config: request.config,
            status: ComparisonStatus::Pending,
            results: ComparisonResults {
                alignment: Some(alignment),
                ..ComparisonResults::default()
            },
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_comparison(&comparison)?;

        if let Some(alignment) = &comparison.results.alignment {
            info!(
                comparison_id = %comparison.id,
                completion_sets = comparison.completion_set_ids.len(),
                matched = alignment.coverage.matched_prompts,
                unmatched = alignment.unmatched_prompts.len(),
                coverage = alignment.coverage.coverage_percentage,
                "comparison created"
            );
        }
        Ok(comparison)
    }

    pub fn comparison(&self, comparison_id: &str) -> Result<Comparison, AnalysisError> {
        self.store
            .comparison(comparison_id)?
            .ok_or_else(|| AnalysisError::not_found("comparison", comparison_id))
    }

    /// Runs the analysis of a `pending` comparison to a terminal state.
    ///
    /// A comparison that is no longer `pending` is returned unchanged. A failure
    /// after the gate is recorded in the results bag with status `failed`
    /// before the error is returned.
    pub fn run_analysis(&self, comparison_id: &str) -> Result<Comparison, AnalysisError> {
        let comparison = self.comparison(comparison_id)?;
        if !self.store.begin_run(comparison_id)? {
            info!(
                comparison_id,
                status = %comparison.status,
                "comparison is not pending; skipping analysis"
            );
            return self.comparison(comparison_id);
        }
        info!(comparison_id, "comparison running");

        let mut results = comparison.results.clone();
        let outcome = match self.execute(&comparison, &mut results) {
            Ok(()) => {
                results.completed_at = Some(now_utc_string());
                self.store
                    .write_results(comparison_id, ComparisonStatus::Completed, &results)
                    .map_err(AnalysisError::from)
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                info!(
                    comparison_id,
                    metrics = results.metrics.len(),
                    insights = results.insights.len(),
                    "comparison completed"
                );
                self.comparison(comparison_id)
            }
            Err(err) => self.record_failure(comparison_id, results, err),
        }
    }

    fn record_failure(
        &self,
        comparison_id: &str,
        mut results: ComparisonResults,
        err: AnalysisError,
    ) -> Result<Comparison, AnalysisError> {
        let message = match err {
            AnalysisError::Computation(message) => message,
            other => other.to_string(),
        };
        results.error = Some(message.clone());
        results.completed_at = None;
        self.store
            .write_results(comparison_id, ComparisonStatus::Failed, &results)?;
        error!(comparison_id, error = %message, "comparison failed");
        Err(AnalysisError::computation(message))
    }

    fn execute(
        &self,
        comparison: &Comparison,
        results: &mut ComparisonResults,
    ) -> Result<(), AnalysisError> {
        self.publish(comparison, results, Step::Loading)?;
        let (prompt_set, completion_sets) = self.load_inputs(comparison)?;

        self.publish(comparison, results, Step::Metrics)?;
        let vectors = completion_sets
            .iter()
            .map(|set| (set.name.clone(), extract_metric_vectors(&set.completions)))
            .collect::<Vec<(String, MetricVectors)>>();
        results.summary = summary_statistics(&vectors);
        results.length_profiles = completion_sets
            .iter()
            .map(|set| {
                let profiles = length_profiles(
                    &set.completions,
                    &self.tokens,
                    self.settings.histogram_max_edges,
                );
                (set.name.clone(), profiles)
            })
            .collect();
        results.overview = completion_sets
            .iter()
            .map(|set| {
                (
                    set.name.clone(),
                    dataset_overview(&prompt_set.prompts, &set.completions),
                )
            })
            .collect();

        self.publish(comparison, results, Step::Statistics)?;
        results.metrics = compare_datasets(&vectors, self.settings.confidence_level)?;

        self.publish(comparison, results, Step::Information)?;
        for set in &completion_sets {
            results.information.insert(
                set.name.clone(),
                mutual_information(&prompt_set.prompts, &set.completions),
            );
            results.diversity.insert(
                set.name.clone(),
                diversity_metrics(&prompt_set.prompts, &set.completions),
            );
        }

        self.publish(comparison, results, Step::Insights)?;
        let sizes = completion_sets
            .iter()
            .map(|set| DatasetSize {
                name: set.name.clone(),
                completions: set.total_completions(),
            })
            .collect::<Vec<DatasetSize>>();
        results.insights = generate_insights(
            &results.metrics,
            &sizes,
            InsightThresholds {
                significance_alpha: self.settings.significance_alpha,
                large_effect_threshold: self.settings.large_effect_threshold,
            },
        );

        Ok(())
    }

    /// Loads the inputs and fails loudly if they no longer satisfy the
    /// creation-time invariants.
    fn load_inputs(
        &self,
        comparison: &Comparison,
    ) -> Result<(PromptSet, Vec<CompletionSet>), AnalysisError> {
        let prompt_set = self
            .store
            .prompt_set(&comparison.prompt_set_id)?
            .ok_or_else(|| {
                AnalysisError::computation(format!(
                    "prompt set {} no longer exists",
                    comparison.prompt_set_id
                ))
            })?;

        let completion_sets = self.store.completion_sets(&comparison.completion_set_ids)?;
        if completion_sets.len() != comparison.completion_set_ids.len() {
            return Err(AnalysisError::computation(format!(
                "expected {} completion sets, found {}",
                comparison.completion_set_ids.len(),
                completion_sets.len()
            )));
        }
        if completion_sets.len() < 2 {
            return Err(AnalysisError::computation(
                "a comparison needs at least 2 completion sets",
            ));
        }

        for set in &completion_sets {
            if set.prompt_set_id != prompt_set.id {
                return Err(AnalysisError::computation(format!(
                    "completion set {} does not belong to prompt set {}",
                    set.id, prompt_set.id
                )));
            }
            if let Some(foreign) = set
                .completions
                .keys()
                .find(|prompt_id| !prompt_set.prompts.contains_key(*prompt_id))
            {
                return Err(AnalysisError::computation(format!(
                    "completion set {} references unknown prompt id {foreign}",
                    set.id
                )));
            }
        }

        Ok((prompt_set, completion_sets))
    }

    fn publish(
        &self,
        comparison: &Comparison,
        results: &mut ComparisonResults,
        step: Step,
    ) -> Result<(), AnalysisError> {
        results.progress = Some(ProgressMarker {
            step: step.as_str().to_string(),
            message: step.message().to_string(),
            updated_at: now_utc_string(),
        });
        self.store
            .write_results(&comparison.id, ComparisonStatus::Running, results)?;
        info!(comparison_id = %comparison.id, step = step.as_str(), "progress");
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> AnalysisError {
    let message = message.into();
    warn!(reason = %message, "comparison rejected");
    AnalysisError::validation(message)
}
