use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::extract::{MetricKind, MetricVectors};
use crate::error::AnalysisError;
use crate::model::DatasetSummary;

/// Outcome of one Welch comparison between two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub statistic: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub degrees_of_freedom: usize,
}

impl WelchTest {
    /// Placeholder for samples too small to test.
    pub fn degenerate() -> Self {
        Self {
            statistic: 0.0,
            p_value: 1.0,
            effect_size: 0.0,
            ci_lower: 0.0,
            ci_upper: 0.0,
            degrees_of_freedom: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticalMetric {
    /// `"<metric> (<dataset_a> vs <dataset_b>)"`
    pub name: String,
    pub metric: MetricKind,
    pub dataset_a: String,
    pub dataset_b: String,
    pub dataset_a_value: f64,
    pub dataset_b_value: f64,
    pub p_value: f64,
    pub effect_size: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub statistic: f64,
    pub degrees_of_freedom: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SummaryStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

fn finite_values(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|value| value.is_finite()).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn students_t(df: f64) -> Result<StudentsT, AnalysisError> {
    StudentsT::new(0.0, 1.0, df).map_err(|err| {
        AnalysisError::computation(format!(
            "invalid Student's t distribution (df={df}): {err}"
        ))
    })
}

/// Welch's unequal-variance t-test with Cohen's d and a confidence interval
/// for the mean difference.
///
/// Non-finite values are dropped first; fewer than two finite values on either
/// side yields [`WelchTest::degenerate`]. The p-value uses the
/// Welch-Satterthwaite degrees of freedom, while the interval and the reported
/// degrees of freedom use `n_a + n_b - 2`. When both samples have zero
/// variance, equal means give p = 1 and different means give p = 0 with a
/// zero statistic.
pub fn welch_t_test(a: &[f64], b: &[f64], confidence_level: f64) -> Result<WelchTest, AnalysisError> {
    let a = finite_values(a);
    let b = finite_values(b);
    if a.len() < 2 || b.len() < 2 {
        return Ok(WelchTest::degenerate());
    }

    let n_a = a.len() as f64;
    let n_b = b.len() as f64;
    let mean_a = mean(&a);
    let mean_b = mean(&b);
    let var_a = sample_variance(&a, mean_a);
    let var_b = sample_variance(&b, mean_b);
    let mean_diff = mean_a - mean_b;

    let pooled_df = a.len() + b.len() - 2;
    let pooled_std = (((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / pooled_df as f64).sqrt();
    let effect_size = if pooled_std > 0.0 {
        mean_diff / pooled_std
    } else {
        0.0
    };

    let se_a = var_a / n_a;
    let se_b = var_b / n_b;
    let se_diff = (se_a + se_b).sqrt();

    let t_critical = students_t(pooled_df as f64)?.inverse_cdf(0.5 + confidence_level / 2.0);
    let ci_lower = mean_diff - t_critical * se_diff;
    let ci_upper = mean_diff + t_critical * se_diff;

    let (statistic, p_value) = if se_diff > 0.0 {
        let statistic = mean_diff / se_diff;
        let welch_df = (se_a + se_b).powi(2)
            / (se_a.powi(2) / (n_a - 1.0) + se_b.powi(2) / (n_b - 1.0));
        let p_value = 2.0 * (1.0 - students_t(welch_df)?.cdf(statistic.abs()));
        (statistic, p_value.clamp(0.0, 1.0))
    } else if mean_diff == 0.0 {
        (0.0, 1.0)
    } else {
        (0.0, 0.0)
    };

    Ok(WelchTest {
        statistic,
        p_value,
        effect_size,
        ci_lower,
        ci_upper,
        degrees_of_freedom: pooled_df,
    })
}

/// Runs [`welch_t_test`] for every unordered dataset pair and every metric.
///
/// Pairs follow input order (`(0,1), (0,2), (1,2), ...`) and metrics follow
/// [`MetricKind::ALL`] within each pair.
pub fn compare_datasets(
    datasets: &[(String, MetricVectors)],
    confidence_level: f64,
) -> Result<Vec<StatisticalMetric>, AnalysisError> {
    let mut metrics = Vec::new();
    let empty = Vec::new();

    for (index, (name_a, vectors_a)) in datasets.iter().enumerate() {
        for (name_b, vectors_b) in &datasets[index + 1..] {
            for kind in MetricKind::ALL {
                let values_a = vectors_a.get(&kind).unwrap_or(&empty);
                let values_b = vectors_b.get(&kind).unwrap_or(&empty);
                let test = welch_t_test(values_a, values_b, confidence_level)?;

                metrics.push(StatisticalMetric {
                    name: format!("{} ({name_a} vs {name_b})", kind.as_str()),
                    metric: kind,
                    dataset_a: name_a.clone(),
                    dataset_b: name_b.clone(),
                    dataset_a_value: mean(&finite_values(values_a)),
                    dataset_b_value: mean(&finite_values(values_b)),
                    p_value: test.p_value,
                    effect_size: test.effect_size,
                    ci_lower: test.ci_lower,
                    ci_upper: test.ci_upper,
                    statistic: test.statistic,
                    degrees_of_freedom: test.degrees_of_freedom,
                });
            }
        }
    }

    Ok(metrics)
}

/// Mean, population std, min, max and count of the finite values.
pub fn summarize(values: &[f64]) -> SummaryStats {
    let values = finite_values(values);
    if values.is_empty() {
        return SummaryStats {
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
        };
    }

    let mean = mean(&values);
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;

    SummaryStats {
        mean,
        std: variance.sqrt(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: values.len(),
    }
}

pub fn summary_statistics(datasets: &[(String, MetricVectors)]) -> BTreeMap<String, DatasetSummary> {
    datasets
        .iter()
        .map(|(name, vectors)| {
            let summary = MetricKind::ALL
                .iter()
                .map(|kind| {
                    let values = vectors.get(kind).map(Vec::as_slice).unwrap_or(&[]);
                    (kind.as_str().to_string(), summarize(values))
                })
                .collect::<DatasetSummary>();
            (name.clone(), summary)
        })
        .collect()
}
