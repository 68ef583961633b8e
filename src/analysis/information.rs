use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{CompletionMap, PromptMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InformationMetrics {
    pub input_entropy: f64,
    pub response_entropy: f64,
    pub completion_entropy: f64,
    pub information_gain: f64,
    pub normalized_information_gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiversityMetrics {
    pub empowerment: f64,
    pub average_completions_per_prompt: f64,
    pub unique_completions_ratio: f64,
    pub completion_length_variance: f64,
}

/// Shannon entropy in bits of a frequency table. Zero counts are skipped.
fn entropy_of_counts<I>(counts: I) -> f64
where
    I: IntoIterator<Item = usize>,
{
    let counts = counts.into_iter().collect::<Vec<usize>>();
    let total = counts.iter().sum::<usize>();
    if total == 0 {
        return 0.0;
    }

    let mut entropy = 0.0_f64;
    for count in counts {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total as f64;
        entropy -= p * p.log2();
    }
    entropy
}

fn entropy_of_values<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a String>,
{
    let mut counts = HashMap::<&str, usize>::new();
    for value in values {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    entropy_of_counts(counts.into_values())
}

/// Completions pooled per distinct prompt text, in prompt text order.
///
/// Ids sharing a text collapse into one group. Groups whose ids carry no
/// completions stay present but empty.
fn completions_by_prompt_text<'a>(
    prompts: &'a PromptMap,
    completions: &'a CompletionMap,
) -> BTreeMap<&'a str, Vec<&'a String>> {
    let mut groups = BTreeMap::<&str, Vec<&String>>::new();
    for (prompt_id, prompt_text) in prompts {
        let group = groups.entry(prompt_text.as_str()).or_default();
        if let Some(values) = completions.get(prompt_id) {
            group.extend(values.iter());
        }
    }
    groups
}

/// H(prompt) over prompt text values.
pub fn input_entropy(prompts: &PromptMap) -> f64 {
    entropy_of_values(prompts.values())
}

/// H(completion | prompt text), each group weighted by its share of all
/// grouped completions.
pub fn response_entropy(prompts: &PromptMap, completions: &CompletionMap) -> f64 {
    let groups = completions_by_prompt_text(prompts, completions);
    let total_pairs = groups.values().map(Vec::len).sum::<usize>();
    if total_pairs == 0 {
        return 0.0;
    }

    groups
        .values()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let weight = group.len() as f64 / total_pairs as f64;
            weight * entropy_of_values(group.iter().copied())
        })
        .sum()
}

/// H(completion) over every completion attached to an id in `prompts`.
pub fn completion_entropy(prompts: &PromptMap, completions: &CompletionMap) -> f64 {
    entropy_of_values(
        prompts
            .keys()
            .filter_map(|prompt_id| completions.get(prompt_id))
            .flatten(),
    )
}

/// H(completion) - H(completion | prompt). Not clamped: small samples may go
/// slightly negative.
pub fn information_gain(prompts: &PromptMap, completions: &CompletionMap) -> f64 {
    completion_entropy(prompts, completions) - response_entropy(prompts, completions)
}

pub fn mutual_information(prompts: &PromptMap, completions: &CompletionMap) -> InformationMetrics {
    let input_entropy = input_entropy(prompts);
    let response_entropy = response_entropy(prompts, completions);
    let completion_entropy = completion_entropy(prompts, completions);
    let information_gain = information_gain(prompts, completions);
    let normalized_information_gain = if input_entropy > 0.0 {
        information_gain / input_entropy
    } else {
        0.0
    };

    InformationMetrics {
        input_entropy,
        response_entropy,
        completion_entropy,
        information_gain,
        normalized_information_gain,
    }
}

/// Completion-count weighted mean entropy over prompt-text groups holding at
/// least two completions.
pub fn empowerment(prompts: &PromptMap, completions: &CompletionMap) -> f64 {
    let groups = completions_by_prompt_text(prompts, completions);

    let mut weighted = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for group in groups.values().filter(|group| group.len() >= 2) {
        let weight = group.len() as f64;
        weighted += weight * entropy_of_values(group.iter().copied());
        total_weight += weight;
    }

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

pub fn diversity_metrics(prompts: &PromptMap, completions: &CompletionMap) -> DiversityMetrics {
    if prompts.is_empty() {
        return DiversityMetrics {
            empowerment: 0.0,
            average_completions_per_prompt: 0.0,
            unique_completions_ratio: 0.0,
            completion_length_variance: 0.0,
        };
    }

    let pooled = prompts
        .keys()
        .filter_map(|prompt_id| completions.get(prompt_id))
        .flatten()
        .collect::<Vec<&String>>();

    let average_completions_per_prompt = pooled.len() as f64 / prompts.len() as f64;
    let unique_completions_ratio = if pooled.is_empty() {
        0.0
    } else {
        let unique = pooled.iter().copied().collect::<HashSet<&String>>().len();
        unique as f64 / pooled.len() as f64
    };

    let lengths = pooled
        .iter()
        .map(|value| value.chars().count() as f64)
        .collect::<Vec<f64>>();
    let completion_length_variance = population_variance(&lengths);

    DiversityMetrics {
        empowerment: empowerment(prompts, completions),
        average_completions_per_prompt,
        unique_completions_ratio,
        completion_length_variance,
    }
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64
}
