use super::{LocalStrategy, Objective, ObjectiveInput, task_objective};
use crate::{ClientErr, Result};

/// FedProx: the task loss plus `(mu / 2) * ||w - w_global||^2`.
#[derive(Debug, Clone, Copy)]
pub struct FedProx {
    mu: f32,
}

impl FedProx {
    pub fn new(mu: f32) -> Self {
        Self { mu }
    }
}

impl LocalStrategy for FedProx {
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        grads: &mut [f32],
    ) -> Result<Objective> {
        let (params, global) = (input.params, input.global);

        if params.len() != global.len() || grads.len() != params.len() {
            return Err(ClientErr::ControlLengthMismatch {
                what: "proximal term",
                got: params.len(),
                expected: global.len(),
            });
        }

        let mut objective = task_objective(&input)?;

        let mut sq_dist = 0.;
        for ((g, w), wg) in grads.iter_mut().zip(params).zip(global) {
            let diff = w - wg;
            sq_dist += diff * diff;
            *g += self.mu * diff;
        }

        objective.loss += 0.5 * self.mu * sq_dist;
        Ok(objective)
    }
}
