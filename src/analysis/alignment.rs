use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{CompletionSet, PromptMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignedRow {
    pub prompt_id: String,
    pub prompt_text: String,
    /// completion set name -> completions for this prompt
    pub completions: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageStats {
    pub total_prompts: usize,
    pub matched_prompts: usize,
    pub coverage_percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignmentResult {
    pub aligned_rows: Vec<AlignedRow>,
    pub unmatched_prompts: Vec<String>,
    pub coverage: CoverageStats,
}

/// Aligns completion sets on the prompt ids of `prompts`.
///
/// A prompt is matched when every set carries its id (an empty completion list
/// still counts as carried) and unmatched when any set lacks it. Coverage is
/// computed over the full key space; only the materialized rows are capped, in
/// ascending prompt id order.
pub fn align_completion_sets(
    prompts: &PromptMap,
    completion_sets: &[CompletionSet],
    row_cap: usize,
) -> AlignmentResult {
    let mut matched = prompts.keys().map(String::as_str).collect::<BTreeSet<&str>>();
    let mut unmatched = BTreeSet::<&str>::new();

    for set in completion_sets {
        matched.retain(|prompt_id| set.completions.contains_key(*prompt_id));
        unmatched.extend(
            prompts
                .keys()
                .map(String::as_str)
                .filter(|prompt_id| !set.completions.contains_key(*prompt_id)),
        );
    }

    let total_prompts = prompts.len();
    let matched_prompts = matched.len();

    let aligned_rows = matched
        .iter()
        .take(row_cap)
        .map(|prompt_id| AlignedRow {
            prompt_id: (*prompt_id).to_string(),
            prompt_text: prompts.get(*prompt_id).cloned().unwrap_or_default(),
            completions: completion_sets
                .iter()
                .map(|set| {
                    (
                        set.name.clone(),
                        set.completions.get(*prompt_id).cloned().unwrap_or_default(),
                    )
                })
                .collect(),
        })
        .collect();

    AlignmentResult {
        aligned_rows,
        unmatched_prompts: unmatched.into_iter().map(ToOwned::to_owned).collect(),
        coverage: CoverageStats {
            total_prompts,
            matched_prompts,
            coverage_percentage: coverage_percentage(matched_prompts, total_prompts),
        },
    }
}

fn coverage_percentage(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = matched as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CompletionMap;

    fn prompt_map(entries: &[(&str, &str)]) -> PromptMap {
        entries
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    fn completion_set(name: &str, entries: &[(&str, &[&str])]) -> CompletionSet {
        let completions = entries
            .iter()
            .map(|(id, values)| {
                (
                    id.to_string(),
                    values.iter().map(|value| value.to_string()).collect(),
                )
            })
            .collect::<CompletionMap>();
        CompletionSet {
            id: format!("cs-{name}"),
            name: name.to_string(),
            prompt_set_id: "ps-1".to_string(),
            completions,
            sha256: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn partially_covered_prompt_is_unmatched() {
        let prompts = prompt_map(&[("a", "x"), ("b", "y")]);
        let first = completion_set("first", &[("a", &["r1", "r2"]), ("b", &["r3"])]);
        let second = completion_set("second", &[("a", &["r4"])]);

        let result = align_completion_sets(&prompts, &[first, second], 200);

        assert_eq!(result.coverage.total_prompts, 2);
        assert_eq!(result.coverage.matched_prompts, 1);
        assert_eq!(result.coverage.coverage_percentage, 50.0);
        assert_eq!(result.unmatched_prompts, vec!["b".to_string()]);
        assert_eq!(result.aligned_rows.len(), 1);

        let row = &result.aligned_rows[0];
        assert_eq!(row.prompt_id, "a");
        assert_eq!(row.prompt_text, "x");
        assert_eq!(row.completions["first"], vec!["r1", "r2"]);
        assert_eq!(row.completions["second"], vec!["r4"]);
    }

    #[test]
    fn empty_prompt_set_has_zero_coverage() {
        let prompts = PromptMap::new();
        let first = completion_set("first", &[]);
        let second = completion_set("second", &[]);

        let result = align_completion_sets(&prompts, &[first, second], 200);

        assert_eq!(result.coverage.coverage_percentage, 0.0);
        assert!(result.unmatched_prompts.is_empty());
        assert!(result.aligned_rows.is_empty());
    }

    #[test]
    fn empty_completion_list_still_counts_as_covered() {
        let prompts = prompt_map(&[("a", "x")]);
        let first = completion_set("first", &[("a", &[])]);
        let second = completion_set("second", &[("a", &["r"])]);

        let result = align_completion_sets(&prompts, &[first, second], 200);

        assert_eq!(result.coverage.coverage_percentage, 100.0);
        assert!(result.aligned_rows[0].completions["first"].is_empty());
    }

    #[test]
    fn full_coverage_is_one_hundred_and_disjoint_from_unmatched() {
        let prompts = prompt_map(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let first = completion_set("first", &[("a", &["1"]), ("b", &["2"]), ("c", &["3"])]);
        let second = completion_set("second", &[("a", &["4"]), ("b", &["5"]), ("c", &["6"])]);

        let result = align_completion_sets(&prompts, &[first, second], 200);

        assert_eq!(result.coverage.coverage_percentage, 100.0);
        assert!(result.unmatched_prompts.is_empty());
        for row in &result.aligned_rows {
            assert!(!result.unmatched_prompts.contains(&row.prompt_id));
        }
    }

    #[test]
    fn coverage_rounds_to_two_decimals() {
        let prompts = prompt_map(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let first = completion_set("first", &[("a", &["1"])]);
        let second = completion_set("second", &[("a", &["2"]), ("b", &["3"])]);

        let result = align_completion_sets(&prompts, &[first, second], 200);

        assert_eq!(result.coverage.coverage_percentage, 33.33);
        assert_eq!(
            result.unmatched_prompts,
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn row_cap_limits_rows_but_not_coverage() {
        let entries = (0..10)
            .map(|index| (format!("p{index:02}"), format!("prompt {index}")))
            .collect::<PromptMap>();
        let completions = entries
            .keys()
            .map(|id| (id.clone(), vec!["done".to_string()]))
            .collect::<CompletionMap>();
        let mut first = completion_set("first", &[]);
        first.completions = completions.clone();
        let mut second = completion_set("second", &[]);
        second.completions = completions;

        let result = align_completion_sets(&entries, &[first, second], 3);

        assert_eq!(result.aligned_rows.len(), 3);
        assert_eq!(result.coverage.matched_prompts, 10);
        assert_eq!(result.coverage.coverage_percentage, 100.0);
        let ids = result
            .aligned_rows
            .iter()
            .map(|row| row.prompt_id.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(ids, vec!["p00", "p01", "p02"]);
    }
}
