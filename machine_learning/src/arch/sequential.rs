use ml_core::{MlError, Result};
use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::layers::Dense;
use crate::initialization;

/// A sequential stack of dense layers: information flows forward when computing an output and
/// backward when computing the *deltas* of its layers.
///
/// The parameters of the stack are the concatenation of its layers' parameters, in order.
#[derive(Clone, Debug)]
pub struct Sequential {
    layers: Vec<Dense>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Dense>,
    {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Returns the amount of parameters of every layer combined.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Dense::size).sum()
    }

    /// Returns the width of the last layer, if there is one.
    pub fn output_dim(&self) -> Option<usize> {
        self.layers.last().map(|layer| layer.dim().1)
    }

    /// Samples initial parameters for every layer, in order.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> initialization::Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());
        for layer in &self.layers {
            params.extend(layer.init_params(rng)?);
        }

        Ok(params)
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The parameters of the whole stack.
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_len(params.len())?;

        let mut out = x.to_owned();
        let mut offset = 0;

        for layer in self.layers.iter_mut() {
            let size = layer.size();
            out = layer.forward(&params[offset..offset + size], out.view())?;
            offset += size;
        }

        Ok(out)
    }

    /// Makes a backward pass through the network, accumulating every layer's gradient.
    ///
    /// # Arguments
    /// * `params` - The parameters of the whole stack.
    /// * `grad` - The gradient of the whole stack, added to.
    /// * `d` - The loss gradient w.r.t. the output of the last forward pass.
    ///
    /// # Returns
    /// The loss gradient w.r.t. the input of the last forward pass.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_len(params.len())?;
        self.check_len(grad.len())?;

        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(d)
    }

    fn check_len(&self, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlError::ShapeMismatch {
                what: "sequential parameters",
                got,
                expected,
            });
        }

        Ok(())
    }
}
