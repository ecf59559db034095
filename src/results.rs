use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use client::Algorithm;
use machine_learning::metrics::MetricName;
use serde::{Deserialize, Serialize};
use server::{FoldResult, RoundLog};

use crate::error::Result;

/// Everything a fold produced: its summary row and the per-round history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold: usize,
    pub result: FoldResult,
    pub rounds: RoundLog,
}

/// The outcome of a whole experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub algorithm: Algorithm,
    pub setting: String,
    pub folds: Vec<FoldResult>,
    /// Mean test value of every summary metric over the folds that report it.
    pub average: BTreeMap<MetricName, f32>,
}

impl ExperimentResult {
    pub fn new(algorithm: Algorithm, setting: String, folds: Vec<FoldResult>) -> Self {
        let average = nan_safe_mean(&folds);

        Self {
            algorithm,
            setting,
            folds,
            average,
        }
    }
}

/// Averages the test summary metrics of `folds`.
///
/// Folds missing a metric, or holding NaN for it, are left out of that
/// metric's mean; metrics no fold reports are left out of the map.
pub fn nan_safe_mean(folds: &[FoldResult]) -> BTreeMap<MetricName, f32> {
    MetricName::SUMMARY
        .iter()
        .filter_map(|&metric| {
            let values: Vec<f64> = folds
                .iter()
                .filter_map(|fold| fold.test.get(metric))
                .filter(|v| !v.is_nan())
                .map(f64::from)
                .collect();

            if values.is_empty() {
                return None;
            }

            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Some((metric, mean as f32))
        })
        .collect()
}

/// Returns the directory results of a run are stored under,
/// `<output_dir>/<algorithm>/<setting>`.
pub fn result_dir(output_dir: &Path, algorithm: Algorithm, setting: &str) -> PathBuf {
    let setting = if setting.is_empty() { "clean" } else { setting };
    output_dir.join(algorithm.as_str()).join(setting)
}

/// Writes `value` as pretty JSON, creating missing parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use machine_learning::metrics::Metrics;

    use super::*;

    fn fold(acc: Option<f32>, uar: Option<f32>) -> FoldResult {
        FoldResult {
            round: 0,
            dev: None,
            test: Metrics {
                samples: 10,
                acc,
                uar,
                ..Metrics::default()
            },
        }
    }

    #[test]
    fn nan_and_missing_values_are_skipped() {
        let folds = [
            fold(Some(0.5), Some(f32::NAN)),
            fold(Some(0.7), Some(0.4)),
            fold(None, None),
        ];

        let mean = nan_safe_mean(&folds);

        assert!((mean[&MetricName::Acc] - 0.6).abs() < 1e-6);
        assert!((mean[&MetricName::Uar] - 0.4).abs() < 1e-6);
        assert!(!mean.contains_key(&MetricName::MacroF));
        assert!(!mean.contains_key(&MetricName::Loss));
    }

    #[test]
    fn clean_setting_directory() {
        let dir = result_dir(Path::new("out"), Algorithm::Scaffold, "");
        assert_eq!(dir, Path::new("out").join("scaffold").join("clean"));

        let dir = result_dir(Path::new("out"), Algorithm::FedAvg, "ml0.3");
        assert_eq!(dir, Path::new("out").join("fed_avg").join("ml0.3"));
    }

    #[test]
    fn average_serializes_by_metric_name() {
        let result = ExperimentResult::new(Algorithm::FedAvg, String::new(), vec![fold(Some(1.), None)]);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["average"]["acc"], 1.);
        assert_eq!(json["algorithm"], "fed_avg");
    }
}
