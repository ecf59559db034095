use super::{LocalStrategy, Objective, ObjectiveInput, task_objective};
use crate::Result;

/// Federated averaging: the plain task loss.
#[derive(Debug, Default, Clone, Copy)]
pub struct FedAvg;

impl LocalStrategy for FedAvg {
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        _grads: &mut [f32],
    ) -> Result<Objective> {
        task_objective(&input)
    }
}
