use std::{collections::BTreeMap, fmt};

use machine_learning::metrics::{MetricName, Metrics};
use serde::{Deserialize, Serialize};

use crate::{Result, ServerErr};

/// The data split a set of metrics was computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sampled client didn't train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyDataset,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedClient {
    pub client_id: String,
    pub reason: SkipReason,
}

/// Everything recorded about a single round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedClient>,
}

impl RoundRecord {
    pub fn get(&self, split: Split) -> Option<&Metrics> {
        match split {
            Split::Train => self.train.as_ref(),
            Split::Dev => self.dev.as_ref(),
            Split::Test => self.test.as_ref(),
        }
    }

    fn slot(&mut self, split: Split) -> &mut Option<Metrics> {
        match split {
            Split::Train => &mut self.train,
            Split::Dev => &mut self.dev,
            Split::Test => &mut self.test,
        }
    }
}

/// Which evaluated round stands for the whole fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "metric")]
pub enum Selection {
    /// The round with the best dev value of a metric.
    BestDev(MetricName),
    /// The last round evaluated on test.
    Last,
}

/// The one-row result of a fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub round: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<Metrics>,
    pub test: Metrics,
}

/// Per-round metrics of a fold, keyed by round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundLog {
    rounds: BTreeMap<usize, RoundRecord>,
}

impl RoundLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn get(&self, round: usize) -> Option<&RoundRecord> {
        self.rounds.get(&round)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &RoundRecord)> {
        self.rounds.iter().map(|(&round, record)| (round, record))
    }

    /// Stores the metrics of `split` at `round`, replacing earlier ones.
    pub fn record(&mut self, round: usize, split: Split, metrics: Metrics) {
        *self.rounds.entry(round).or_default().slot(split) = Some(metrics);
    }

    /// Stores the clients skipped at `round`.
    pub fn record_skips(&mut self, round: usize, skipped: Vec<SkippedClient>) {
        self.rounds.entry(round).or_default().skipped = skipped;
    }

    /// Collapses the log to the round chosen by `selection`.
    ///
    /// Only rounds evaluated on test are candidates. Rounds whose dev value is
    /// missing or NaN can't be the best dev round; if no round has one, the
    /// last evaluated round is used. Ties keep the earliest round.
    ///
    /// # Errors
    /// Returns `ServerErr::NothingEvaluated` if no round was evaluated on test.
    pub fn summarize(&self, selection: Selection) -> Result<FoldResult> {
        let evaluated = || {
            self.rounds
                .iter()
                .filter_map(|(&round, record)| record.test.map(|test| (round, record.dev, test)))
        };

        let best = match selection {
            Selection::BestDev(metric) => evaluated()
                .filter_map(|(round, dev, test)| {
                    let value = dev?.get(metric).filter(|v| !v.is_nan())?;
                    Some((value, round, dev, test))
                })
                .fold(None, |best: Option<(f32, usize, Option<Metrics>, Metrics)>, cand| {
                    match best {
                        Some(b) if !better(metric, cand.0, b.0) => Some(b),
                        _ => Some(cand),
                    }
                })
                .map(|(_, round, dev, test)| (round, dev, test)),
            Selection::Last => None,
        };

        let (round, dev, test) = best
            .or_else(|| evaluated().last())
            .ok_or(ServerErr::NothingEvaluated)?;

        Ok(FoldResult { round, dev, test })
    }
}

fn better(metric: MetricName, candidate: f32, best: f32) -> bool {
    if metric.higher_is_better() {
        candidate > best
    } else {
        candidate < best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(uar: f32, loss: f32) -> Metrics {
        Metrics {
            loss,
            samples: 10,
            uar: Some(uar),
            ..Metrics::default()
        }
    }

    fn log() -> RoundLog {
        let mut log = RoundLog::new();
        for (round, dev_uar, test_uar) in [(4, 0.5, 0.4), (9, 0.7, 0.6), (14, 0.7, 0.9), (19, 0.6, 0.5)] {
            log.record(round, Split::Dev, metrics(dev_uar, 1. - dev_uar));
            log.record(round, Split::Test, metrics(test_uar, 1.));
        }
        log.record(20, Split::Train, metrics(0.99, 0.1));
        log
    }

    #[test]
    fn best_dev_keeps_the_earliest_tie() {
        let result = log().summarize(Selection::BestDev(MetricName::Uar)).unwrap();
        assert_eq!(result.round, 9);
        assert_eq!(result.test.uar, Some(0.6));
    }

    #[test]
    fn lower_is_better_for_loss() {
        let result = log().summarize(Selection::BestDev(MetricName::Loss)).unwrap();
        assert_eq!(result.round, 9);
    }

    #[test]
    fn last_evaluated_round() {
        let result = log().summarize(Selection::Last).unwrap();
        assert_eq!(result.round, 19);
    }

    #[test]
    fn falls_back_to_last_without_dev() {
        let mut log = RoundLog::new();
        log.record(0, Split::Test, metrics(0.3, 1.));
        log.record(5, Split::Test, metrics(0.4, 1.));

        let result = log.summarize(Selection::BestDev(MetricName::MacroF)).unwrap();
        assert_eq!(result.round, 5);
    }

    #[test]
    fn nothing_evaluated() {
        let mut log = RoundLog::new();
        log.record(0, Split::Train, metrics(0.3, 1.));

        assert!(matches!(
            log.summarize(Selection::Last),
            Err(ServerErr::NothingEvaluated)
        ));
    }

    #[test]
    fn serializes_rounds_by_index() {
        let mut log = RoundLog::new();
        log.record(3, Split::Dev, metrics(0.5, 0.2));

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["3"]["dev"]["uar"], 0.5);
        assert!(json["3"].get("test").is_none());
    }
}
