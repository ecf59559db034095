use ndarray::Array1;

use super::{LocalStrategy, Objective, ObjectiveInput, task_objective};
use crate::{ClientErr, Result};

/// FedRS: restricted softmax.
///
/// Logits are scaled per class by `alpha + (1 - alpha) * count / max_count`
/// before the loss, so classes the client never sees are damped to `alpha`.
#[derive(Debug, Clone)]
pub struct FedRs {
    scale: Array1<f32>,
}

impl FedRs {
    /// Returns a new `FedRs` for a client's local label distribution.
    ///
    /// # Arguments
    /// * `class_counts` - Usable labels per class.
    /// * `alpha` - The scale of absent classes.
    pub fn new(class_counts: &[usize], alpha: f32) -> Self {
        let max = class_counts.iter().copied().max().unwrap_or_default();

        let scale = class_counts
            .iter()
            .map(|&count| match max {
                0 => 1.,
                max => alpha + (1. - alpha) * count as f32 / max as f32,
            })
            .collect();

        Self { scale }
    }

    pub fn scale(&self) -> &[f32] {
        self.scale.as_slice().unwrap_or_default()
    }
}

impl LocalStrategy for FedRs {
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        _grads: &mut [f32],
    ) -> Result<Objective> {
        if input.logits.ncols() != self.scale.len() {
            return Err(ClientErr::ControlLengthMismatch {
                what: "class scale",
                got: self.scale.len(),
                expected: input.logits.ncols(),
            });
        }

        let scaled = &input.logits * &self.scale;
        let mut objective = task_objective(&ObjectiveInput {
            logits: scaled.view(),
            ..input
        })?;

        objective.d_logits *= &self.scale;
        Ok(objective)
    }
}
