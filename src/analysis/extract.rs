use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::tokens::{TokenCounter, word_count};
use crate::model::{CompletionMap, DatasetOverview, PromptMap};

/// Per-example metrics compared between completion sets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// characters per completion
    CompletionLength,
    /// completions per prompt id
    CompletionCount,
    /// distinct completions per prompt id
    UniqueCompletions,
    /// whitespace words per completion
    WordCount,
    /// distinct / total completions per prompt id
    ResponseDiversity,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::CompletionLength,
        MetricKind::CompletionCount,
        MetricKind::UniqueCompletions,
        MetricKind::WordCount,
        MetricKind::ResponseDiversity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CompletionLength => "completion_length",
            Self::CompletionCount => "completion_count",
            Self::UniqueCompletions => "unique_completions",
            Self::WordCount => "word_count",
            Self::ResponseDiversity => "response_diversity",
        }
    }
}

/// Raw per-example values for every [`MetricKind`], in extraction order.
pub type MetricVectors = BTreeMap<MetricKind, Vec<f64>>;

/// Extracts per-example metric vectors from one completion set.
///
/// Length and word metrics hold one value per completion; count and diversity
/// metrics hold one value per prompt id. Ids with no completions are skipped.
pub fn extract_metric_vectors(completions: &CompletionMap) -> MetricVectors {
    let mut vectors = MetricKind::ALL
        .iter()
        .map(|kind| (*kind, Vec::new()))
        .collect::<MetricVectors>();

    for values in completions.values().filter(|values| !values.is_empty()) {
        let unique = values.iter().collect::<HashSet<&String>>().len();

        push(
            &mut vectors,
            MetricKind::CompletionLength,
            values.iter().map(|value| value.chars().count() as f64),
        );
        push(
            &mut vectors,
            MetricKind::CompletionCount,
            [values.len() as f64],
        );
        push(&mut vectors, MetricKind::UniqueCompletions, [unique as f64]);
        push(
            &mut vectors,
            MetricKind::WordCount,
            values.iter().map(|value| word_count(value) as f64),
        );
        push(
            &mut vectors,
            MetricKind::ResponseDiversity,
            [unique as f64 / values.len() as f64],
        );
    }

    vectors
}

fn push<I>(vectors: &mut MetricVectors, kind: MetricKind, values: I)
where
    I: IntoIterator<Item = f64>,
{
    vectors.entry(kind).or_default().extend(values);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    Characters,
    #[cfg_attr(not(feature = "subword"), allow(dead_code))]
    Tokens,
    Words,
}

impl LengthUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Characters => "characters",
            Self::Tokens => "tokens",
            Self::Words => "words",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramBin {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LengthProfile {
    pub unit: LengthUnit,
    pub mean: f64,
    pub std: f64,
    pub min: usize,
    pub max: usize,
    pub distribution: Vec<HistogramBin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LengthProfiles {
    pub characters: LengthProfile,
    pub tokens: LengthProfile,
}

pub fn length_profiles(
    completions: &CompletionMap,
    counter: &TokenCounter,
    max_edges: usize,
) -> LengthProfiles {
    let pooled = completions.values().flatten().collect::<Vec<&String>>();

    let characters = pooled
        .iter()
        .map(|value| value.chars().count())
        .collect::<Vec<usize>>();
    let tokens = pooled
        .iter()
        .map(|value| counter.count(value))
        .collect::<Vec<usize>>();

    LengthProfiles {
        characters: length_profile(LengthUnit::Characters, &characters, max_edges),
        tokens: length_profile(counter.unit(), &tokens, max_edges),
    }
}

/// Mean, population std, range and histogram of `counts`.
///
/// The histogram uses `min(max_edges, max - min + 1)` evenly spaced edges over
/// `[min, max]`; the last bin is closed on the right. Equal min and max
/// collapse into a single bin labelled with that value.
pub fn length_profile(unit: LengthUnit, counts: &[usize], max_edges: usize) -> LengthProfile {
    let (Some(&min), Some(&max)) = (counts.iter().min(), counts.iter().max()) else {
        return LengthProfile {
            unit,
            mean: 0.0,
            std: 0.0,
            min: 0,
            max: 0,
            distribution: Vec::new(),
        };
    };

    let n = counts.len() as f64;
    let mean = counts.iter().map(|count| *count as f64).sum::<f64>() / n;
    let variance = counts
        .iter()
        .map(|count| (*count as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    LengthProfile {
        unit,
        mean,
        std: variance.sqrt(),
        min,
        max,
        distribution: histogram(counts, min, max, max_edges),
    }
}

fn histogram(counts: &[usize], min: usize, max: usize, max_edges: usize) -> Vec<HistogramBin> {
    if min == max {
        return vec![HistogramBin {
            label: min.to_string(),
            count: counts.len(),
        }];
    }

    let edge_count = max_edges.min(max - min + 1).max(2);
    let bin_count = edge_count - 1;
    let width = (max - min) as f64 / bin_count as f64;
    let edges = (0..edge_count)
        .map(|index| min as f64 + (max - min) as f64 * index as f64 / bin_count as f64)
        .collect::<Vec<f64>>();

    let mut bins = vec![0usize; bin_count];
    for count in counts {
        let offset = (*count - min) as f64 / width;
        let index = (offset.floor() as usize).min(bin_count - 1);
        bins[index] += 1;
    }

    bins.into_iter()
        .enumerate()
        .map(|(index, count)| HistogramBin {
            label: format!("{}-{}", edges[index] as i64, edges[index + 1] as i64),
            count,
        })
        .collect()
}

/// Headline counts for one completion set against its prompt set.
///
/// Only ids present in `prompts` are counted; an id is answered when it
/// carries at least one completion.
pub fn dataset_overview(prompts: &PromptMap, completions: &CompletionMap) -> DatasetOverview {
    let attached = prompts
        .keys()
        .filter_map(|prompt_id| completions.get(prompt_id))
        .collect::<Vec<&Vec<String>>>();
    let total_completions = attached.iter().map(|values| values.len()).sum::<usize>();

    DatasetOverview {
        total_prompts: prompts.len(),
        total_completions,
        unique_prompts: prompts.values().collect::<HashSet<&String>>().len(),
        unique_completions: attached
            .iter()
            .flat_map(|values| values.iter())
            .collect::<HashSet<&String>>()
            .len(),
        answered_prompts: attached.iter().filter(|values| !values.is_empty()).count(),
        avg_completions_per_prompt: if prompts.is_empty() {
            0.0
        } else {
            total_completions as f64 / prompts.len() as f64
        },
    }
}
