use std::num::NonZeroUsize;

use machine_learning::{
    arch::loss::LossFn,
    dataset::Dataset,
    metrics::{Metrics, MetricsAccumulator},
};
use ml_core::Model;

use crate::Result;

/// Runs a forward-only pass of `params` over `dataset`.
///
/// # Arguments
/// * `model` - The classifier to evaluate.
/// * `loss_fn` - The loss reported alongside the classification metrics.
/// * `params` - The parameters to evaluate.
/// * `dataset` - The samples to score, in their stored order.
/// * `batch_size` - The amount of samples per forward pass.
///
/// # Errors
/// Returns a `ServerErr` if a batch doesn't fit the model.
pub fn evaluate<M, L>(
    model: &mut M,
    loss_fn: &L,
    params: &[f32],
    dataset: &Dataset,
    batch_size: NonZeroUsize,
) -> Result<Metrics>
where
    M: Model,
    L: LossFn + ?Sized,
{
    let mut acc = MetricsAccumulator::new(dataset.task(), dataset.num_classes());

    for batch in dataset.batches(batch_size) {
        let batch = batch?;
        let logits = model.forward(params, &batch)?;
        let loss = loss_fn.loss(logits.view(), batch.labels(), batch.label_mask())?;
        acc.push(logits.view(), &batch, loss)?;
    }

    Ok(acc.finish())
}
