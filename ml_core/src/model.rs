use ndarray::{Array2, ArrayView2};

use crate::{Batch, Result};

/// A pure computational classifier.
///
/// A `Model` defines how to evaluate logits and accumulate parameter gradients.
/// It does not:
/// - own parameters,
/// - access datasets,
/// - implement training loops.
///
/// Parameters live outside the model as a flat slice, so getting or setting
/// them is a copy of that slice. Implementations may cache activations of the
/// last forward pass, which is why both passes take `&mut self`; a model is
/// cloned for every concurrent user.
pub trait Model: Clone + Send + Sync {
    /// Returns the number of scalar parameters expected in `params` and `grads`.
    fn num_params(&self) -> usize;

    /// Returns the number of output classes, the width of the logits.
    fn num_classes(&self) -> usize;

    /// Computes the `(rows, num_classes)` logits of a batch.
    ///
    /// # Errors
    /// Returns `MlError` if invariants are violated (e.g., shape mismatch).
    fn forward(&mut self, params: &[f32], batch: &Batch) -> Result<Array2<f32>>;

    /// Accumulates gradients into `grads` given the loss gradient w.r.t. the
    /// logits of the last forward pass.
    ///
    /// Implementations must add to `grads` rather than overwrite it.
    ///
    /// # Errors
    /// Returns `MlError` if invariants are violated.
    fn backward(&mut self, params: &[f32], d_logits: ArrayView2<f32>, grads: &mut [f32]) -> Result<()>;
}
