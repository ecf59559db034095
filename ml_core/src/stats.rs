/// Statistics produced by a single local optimization step.
///
/// This type keeps fields private to allow evolving the internal counters
/// without breaking the public API.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStats {
    samples: usize,
    labeled: usize,
    loss: f32,
}

impl StepStats {
    /// Creates a new `StepStats`.
    ///
    /// # Args
    /// * `samples` - Total number of samples processed during the step.
    /// * `labeled` - Number of those samples that carried a usable label.
    /// * `loss` - The objective value of the step.
    ///
    /// # Returns
    /// A `StepStats` instance containing the provided counters.
    ///
    /// # Panics
    /// Never panics.
    pub fn new(samples: usize, labeled: usize, loss: f32) -> Self {
        Self {
            samples,
            labeled,
            loss,
        }
    }

    /// Returns the number of samples processed in the step.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Returns the number of samples that contributed to the loss.
    pub fn labeled(&self) -> usize {
        self.labeled
    }

    /// Returns the objective value of the step.
    pub fn loss(&self) -> f32 {
        self.loss
    }
}
