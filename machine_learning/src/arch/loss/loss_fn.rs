use ml_core::{Labels, MlError, Result, TaskKind};
use ndarray::{Array2, ArrayView1, ArrayView2};

use super::{BceWithLogits, CrossEntropy};

/// A supervised loss over logits.
///
/// Rows whose mask entry is zero contribute neither to the loss nor to its
/// gradient, and the loss is averaged over the unmasked rows only.
pub trait LossFn: Send + Sync {
    /// Computes the mean loss of the unmasked rows.
    fn loss(&self, logits: ArrayView2<f32>, labels: &Labels, mask: ArrayView1<f32>)
    -> Result<f32>;

    /// Computes the gradient of `loss` w.r.t. the logits.
    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &Labels,
        mask: ArrayView1<f32>,
    ) -> Result<Array2<f32>>;
}

/// The loss matching a task, dispatched statically.
#[derive(Debug, Clone, Copy)]
pub enum Loss {
    CrossEntropy(CrossEntropy),
    BceWithLogits(BceWithLogits),
}

impl Loss {
    /// Returns the loss used to train models for `task`.
    pub fn for_task(task: TaskKind) -> Self {
        match task {
            TaskKind::SingleLabel => Loss::CrossEntropy(CrossEntropy),
            TaskKind::MultiLabel => Loss::BceWithLogits(BceWithLogits),
        }
    }
}

impl LossFn for Loss {
    fn loss(&self, logits: ArrayView2<f32>, labels: &Labels, mask: ArrayView1<f32>) -> Result<f32> {
        match self {
            Loss::CrossEntropy(l) => l.loss(logits, labels, mask),
            Loss::BceWithLogits(l) => l.loss(logits, labels, mask),
        }
    }

    fn loss_prime(
        &self,
        logits: ArrayView2<f32>,
        labels: &Labels,
        mask: ArrayView1<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Loss::CrossEntropy(l) => l.loss_prime(logits, labels, mask),
            Loss::BceWithLogits(l) => l.loss_prime(logits, labels, mask),
        }
    }
}

/// Checks that logits, labels and mask cover the same rows and returns the
/// amount of unmasked rows.
pub(super) fn labeled_rows(
    logits: ArrayView2<f32>,
    labels: &Labels,
    mask: ArrayView1<f32>,
) -> Result<f32> {
    if labels.len() != logits.nrows() {
        return Err(MlError::ShapeMismatch {
            what: "labels",
            got: labels.len(),
            expected: logits.nrows(),
        });
    }

    if mask.len() != logits.nrows() {
        return Err(MlError::ShapeMismatch {
            what: "label mask",
            got: mask.len(),
            expected: logits.nrows(),
        });
    }

    Ok(mask.sum())
}
