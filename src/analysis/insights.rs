use super::stats::StatisticalMetric;

/// Total completion count of one dataset, used for the size-range insight.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSize {
    pub name: String,
    pub completions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsightThresholds {
    pub significance_alpha: f64,
    pub large_effect_threshold: f64,
}

/// Rule-based summary of the comparator output.
///
/// Each rule emits at most one sentence and is skipped when its condition does
/// not hold. Ties resolve to the earliest entry in input order.
pub fn generate_insights(
    metrics: &[StatisticalMetric],
    sizes: &[DatasetSize],
    thresholds: InsightThresholds,
) -> Vec<String> {
    let mut insights = Vec::new();

    let significant = metrics
        .iter()
        .filter(|metric| metric.p_value < thresholds.significance_alpha)
        .collect::<Vec<&StatisticalMetric>>();
    if !significant.is_empty() {
        insights.push(format!(
            "Found {} statistically significant difference{} (p < {}) across {} metric comparisons.",
            significant.len(),
            plural(significant.len()),
            thresholds.significance_alpha,
            metrics.len()
        ));

        if let Some(strongest) = first_minimum(&significant, |metric| metric.p_value) {
            insights.push(format!(
                "Most significant difference: {} (p = {:.4}, effect size = {:.2}).",
                strongest.name, strongest.p_value, strongest.effect_size
            ));
        }
    }

    if let (Some(smallest), Some(largest)) = (
        first_minimum(sizes, |size| size.completions as f64),
        first_minimum(sizes, |size| -(size.completions as f64)),
    ) {
        insights.push(format!(
            "Dataset sizes range from {} completions ({}) to {} completions ({}).",
            smallest.completions, smallest.name, largest.completions, largest.name
        ));
    }

    let large_effects = metrics
        .iter()
        .filter(|metric| metric.effect_size.abs() > thresholds.large_effect_threshold)
        .count();
    if large_effects > 0 {
        insights.push(format!(
            "{} metric comparison{} show{} a large effect size (|d| > {}).",
            large_effects,
            plural(large_effects),
            if large_effects == 1 { "s" } else { "" },
            thresholds.large_effect_threshold
        ));
    }

    insights
}

fn first_minimum<T, F>(items: &[T], key: F) -> Option<&T>
where
    F: Fn(&T) -> f64,
{
    let mut best: Option<(&T, f64)> = None;
    for item in items {
        let value = key(item);
        match best {
            Some((_, current)) if value >= current => {}
            _ => best = Some((item, value)),
        }
    }
    best.map(|(item, _)| item)
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
