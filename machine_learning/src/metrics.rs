use std::fmt;

use ml_core::{Batch, Labels, MlError, Result, TaskKind};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

/// The scalar metrics tracked per split and round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Loss,
    Acc,
    Top5Acc,
    Uar,
    MacroF,
}

impl MetricName {
    /// The metrics averaged across folds.
    pub const SUMMARY: [MetricName; 4] = [
        MetricName::MacroF,
        MetricName::Acc,
        MetricName::Uar,
        MetricName::Top5Acc,
    ];

    pub fn higher_is_better(self) -> bool {
        self != MetricName::Loss
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Loss => "loss",
            MetricName::Acc => "acc",
            MetricName::Top5Acc => "top5_acc",
            MetricName::Uar => "uar",
            MetricName::MacroF => "macro_f",
        }
    }

    /// The metric used to pick the best round of a task.
    pub fn default_for(task: TaskKind) -> Self {
        match task {
            TaskKind::SingleLabel => MetricName::Uar,
            TaskKind::MultiLabel => MetricName::MacroF,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The metrics of a model over a set of samples.
///
/// Classification metrics are `None` when no sample carried a usable label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub loss: f32,
    pub samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top5_acc: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uar: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_f: Option<f32>,
}

impl Metrics {
    pub fn get(&self, name: MetricName) -> Option<f32> {
        match name {
            MetricName::Loss => Some(self.loss),
            MetricName::Acc => self.acc,
            MetricName::Top5Acc => self.top5_acc,
            MetricName::Uar => self.uar,
            MetricName::MacroF => self.macro_f,
        }
    }

    /// Averages metrics weighting each one by its sample count.
    ///
    /// # Returns
    /// `None` if there is nothing to average or every weight is zero.
    pub fn weighted_mean<'a, I>(items: I) -> Option<Metrics>
    where
        I: IntoIterator<Item = &'a Metrics>,
    {
        let items: Vec<&Metrics> = items.into_iter().collect();
        let total: usize = items.iter().map(|m| m.samples).sum();
        if total == 0 {
            return None;
        }

        let mut mean = combine(&items, |m| m.samples as f64);
        mean.samples = total;
        Some(mean)
    }

    /// Averages metrics giving each one the same weight, as done for the
    /// epochs of a local training run.
    pub fn mean<'a, I>(items: I) -> Option<Metrics>
    where
        I: IntoIterator<Item = &'a Metrics>,
    {
        let items: Vec<&Metrics> = items.into_iter().collect();
        if items.is_empty() {
            return None;
        }

        let mut mean = combine(&items, |_| 1.);
        mean.samples = items.iter().map(|m| m.samples).max().unwrap_or_default();
        Some(mean)
    }
}

fn combine(items: &[&Metrics], weight: impl Fn(&Metrics) -> f64) -> Metrics {
    let average = |get: &dyn Fn(&Metrics) -> Option<f32>| -> Option<f32> {
        let (sum, total) = items
            .iter()
            .filter_map(|&m| get(m).map(|v| (v as f64 * weight(m), weight(m))))
            .fold((0., 0.), |(s, t), (v, w)| (s + v, t + w));

        (total > 0.).then(|| (sum / total) as f32)
    };

    Metrics {
        loss: average(&|m| Some(m.loss)).unwrap_or_default(),
        samples: 0,
        acc: average(&|m| m.acc),
        top5_acc: average(&|m| m.top5_acc),
        uar: average(&|m| m.uar),
        macro_f: average(&|m| m.macro_f),
    }
}

/// Accumulates predictions batch by batch and turns them into `Metrics`.
///
/// Only rows with a usable label are scored; the loss is the mean of the
/// per-batch losses.
#[derive(Debug, Clone)]
pub struct MetricsAccumulator {
    task: TaskKind,
    num_classes: usize,
    loss_sum: f32,
    batches: usize,
    samples: usize,

    // Single-label, confusion[truth * num_classes + prediction]
    confusion: Vec<usize>,
    top5_hits: usize,

    // Multi-label, per class
    true_pos: Vec<usize>,
    false_pos: Vec<usize>,
    false_neg: Vec<usize>,
    correct_bits: usize,
    scored_rows: usize,
}

impl MetricsAccumulator {
    pub fn new(task: TaskKind, num_classes: usize) -> Self {
        let per_class = match task {
            TaskKind::SingleLabel => 0,
            TaskKind::MultiLabel => num_classes,
        };

        Self {
            task,
            num_classes,
            loss_sum: 0.,
            batches: 0,
            samples: 0,
            confusion: match task {
                TaskKind::SingleLabel => vec![0; num_classes * num_classes],
                TaskKind::MultiLabel => Vec::new(),
            },
            top5_hits: 0,
            true_pos: vec![0; per_class],
            false_pos: vec![0; per_class],
            false_neg: vec![0; per_class],
            correct_bits: 0,
            scored_rows: 0,
        }
    }

    /// Records the logits of a batch and the loss computed on them.
    ///
    /// # Errors
    /// Returns an `MlError` if the logits don't match the batch or the task.
    pub fn push(&mut self, logits: ArrayView2<f32>, batch: &Batch, loss: f32) -> Result<()> {
        if logits.nrows() != batch.len() {
            return Err(MlError::ShapeMismatch {
                what: "logit rows",
                got: logits.nrows(),
                expected: batch.len(),
            });
        }

        if logits.ncols() != self.num_classes {
            return Err(MlError::ShapeMismatch {
                what: "logit classes",
                got: logits.ncols(),
                expected: self.num_classes,
            });
        }

        if batch.labels().task() != self.task {
            return Err(MlError::InvalidInput("batch labels don't match the task"));
        }

        self.loss_sum += loss;
        self.batches += 1;
        self.samples += batch.len();

        let mask = batch.label_mask();
        let c = self.num_classes;

        match batch.labels() {
            Labels::Classes(classes) => {
                for ((row, &y), &m) in logits.rows().into_iter().zip(classes).zip(mask) {
                    if m <= 0. {
                        continue;
                    }

                    let mut prediction = 0;
                    for (j, &v) in row.iter().enumerate() {
                        if v > row[prediction] {
                            prediction = j;
                        }
                    }

                    self.confusion[y * c + prediction] += 1;

                    let above = row.iter().filter(|&&v| v > row[y]).count();
                    if above < 5 {
                        self.top5_hits += 1;
                    }
                }
            }
            Labels::MultiHot(hot) => {
                for ((row, truth), &m) in logits.rows().into_iter().zip(hot.rows()).zip(mask) {
                    if m <= 0. {
                        continue;
                    }

                    self.scored_rows += 1;
                    for (j, (&z, &y)) in row.iter().zip(truth).enumerate() {
                        let predicted = z > 0.;
                        let actual = y > 0.5;

                        match (predicted, actual) {
                            (true, true) => self.true_pos[j] += 1,
                            (true, false) => self.false_pos[j] += 1,
                            (false, true) => self.false_neg[j] += 1,
                            (false, false) => {}
                        }

                        if predicted == actual {
                            self.correct_bits += 1;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns the metrics of every batch pushed so far.
    pub fn finish(&self) -> Metrics {
        let loss = match self.batches {
            0 => 0.,
            n => self.loss_sum / n as f32,
        };

        let mut metrics = Metrics {
            loss,
            samples: self.samples,
            ..Metrics::default()
        };

        match self.task {
            TaskKind::SingleLabel => self.single_label(&mut metrics),
            TaskKind::MultiLabel => self.multi_label(&mut metrics),
        }

        metrics
    }

    fn single_label(&self, metrics: &mut Metrics) {
        let c = self.num_classes;
        let scored: usize = self.confusion.iter().sum();
        if scored == 0 {
            return;
        }

        let hits: usize = (0..c).map(|k| self.confusion[k * c + k]).sum();
        metrics.acc = Some(hits as f32 / scored as f32);

        if c > 5 {
            metrics.top5_acc = Some(self.top5_hits as f32 / scored as f32);
        }

        let mut recalls = Vec::with_capacity(c);
        let mut f_scores = Vec::with_capacity(c);

        for k in 0..c {
            let support: usize = self.confusion[k * c..(k + 1) * c].iter().sum();
            let predicted: usize = (0..c).map(|t| self.confusion[t * c + k]).sum();
            let tp = self.confusion[k * c + k];

            if support > 0 {
                recalls.push(tp as f32 / support as f32);
            }

            if support + predicted > 0 {
                f_scores.push(2. * tp as f32 / (support + predicted) as f32);
            }
        }

        metrics.uar = mean(&recalls);
        metrics.macro_f = mean(&f_scores);
    }

    fn multi_label(&self, metrics: &mut Metrics) {
        if self.scored_rows == 0 {
            return;
        }

        let f_scores: Vec<f32> = (0..self.num_classes)
            .map(|k| {
                let tp = self.true_pos[k];
                let denom = 2 * tp + self.false_pos[k] + self.false_neg[k];
                if denom == 0 { 0. } else { 2. * tp as f32 / denom as f32 }
            })
            .collect();

        metrics.macro_f = mean(&f_scores);
        metrics.acc =
            Some(self.correct_bits as f32 / (self.scored_rows * self.num_classes) as f32);
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    (!values.is_empty()).then(|| values.iter().sum::<f32>() / values.len() as f32)
}
