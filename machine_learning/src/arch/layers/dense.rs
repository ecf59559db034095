use ml_core::{MlError, Result};
use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    arch::activations::ActFn,
    initialization::{self, ParamGen, RandParamGen},
};

/// A fully connected layer, `a = act(x · W + b)`.
///
/// Its parameter slice holds the `(n, m)` weights in row-major order followed by
/// the `m` biases, so a layer of dimension `(n, m)` has `(n + 1) * m` parameters.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Returns a new `Dense`.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs of the layer.
    /// * `act_fn` - An optional activation applied to the affine output.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: Array2::zeros((0, dim.0)),
            z: Array2::zeros((0, dim.1)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Samples initial parameters for this layer.
    ///
    /// Weights follow a Xavier uniform distribution and biases start at zero.
    ///
    /// # Arguments
    /// * `rng` - The random number generator to draw from.
    ///
    /// # Returns
    /// The parameter slice of this layer or an error if the range is invalid.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> initialization::Result<Vec<f32>> {
        let (n, m) = self.dim;
        let mut param_gen = RandParamGen::xavier_uniform(rng, n, m)?;
        let mut params = param_gen.sample(n * m);
        params.resize(self.size, 0.);
        Ok(params)
    }

    /// Makes a forward pass through the layer, caching what the backward pass needs.
    ///
    /// # Arguments
    /// * `params` - The parameter slice of this layer.
    /// * `x` - A `(rows, n)` input.
    ///
    /// # Returns
    /// The `(rows, m)` activations or an error if shapes disagree.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (w, b) = self.view_params(params)?;

        if x.ncols() != self.dim.0 {
            return Err(MlError::ShapeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let mut z = x.dot(&w);
        z += &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|v| act_fn.f(v)),
            None => z.clone(),
        };

        self.x = x.to_owned();
        self.z = z;
        Ok(a)
    }

    /// Accumulates this layer's gradient and propagates the delta backwards.
    ///
    /// # Arguments
    /// * `params` - The parameter slice of this layer.
    /// * `grad` - The gradient slice of this layer, added to.
    /// * `d` - The loss gradient w.r.t. this layer's activations.
    ///
    /// # Returns
    /// The loss gradient w.r.t. this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlError::ShapeMismatch {
                what: "dense delta",
                got: d.len(),
                expected: self.z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (w, _) = self.view_params(params)?;
        let (mut dw, mut db) = self.view_grad(grad)?;

        linalg::general_mat_mul(1.0, &self.x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)
            .map_err(|_| MlError::InvalidInput("dense gradient layout"))?;
        let db = ArrayViewMut1::from(db_raw);
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size])
            .map_err(|_| MlError::InvalidInput("dense parameter layout"))?;
        let biases = ArrayView1::from(&params[w_size..]);
        Ok((weights, biases))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlError::ShapeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn loss(layer: &mut Dense, params: &[f32], x: ArrayView2<f32>) -> f32 {
        layer.forward(params, x).unwrap().sum()
    }

    #[test]
    fn forward_affine() {
        let mut layer = Dense::new((2, 1), None);
        // w = [[1], [2]], b = [0.5]
        let params = [1., 2., 0.5];
        let x = array![[1., 1.], [2., 0.]];

        let out = layer.forward(&params, x.view()).unwrap();
        assert_eq!(out, array![[3.5], [2.5]]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut layer = Dense::new((3, 2), Some(ActFn::sigmoid(1.)));
        let params: Vec<f32> = (0..layer.size()).map(|i| 0.1 * i as f32 - 0.3).collect();
        let x = array![[0.5, -1., 2.], [1., 0.25, -0.5]];

        let out = layer.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.; layer.size()];
        layer
            .backward(&params, &mut grad, Array2::ones(out.dim()))
            .unwrap();

        let eps = 1e-3;
        for i in 0..params.len() {
            let mut plus = params.clone();
            plus[i] += eps;
            let mut minus = params.clone();
            minus[i] -= eps;

            let numeric =
                (loss(&mut layer, &plus, x.view()) - loss(&mut layer, &minus, x.view())) / (2. * eps);
            assert!(
                (numeric - grad[i]).abs() < 1e-2,
                "param {i}: numeric {numeric}, analytic {}",
                grad[i]
            );
        }
    }

    #[test]
    fn backward_accumulates() {
        let mut layer = Dense::new((1, 1), None);
        let params = [2., 0.];
        let x = array![[3.]];

        layer.forward(&params, x.view()).unwrap();
        let mut grad = vec![1., 1.];
        layer.backward(&params, &mut grad, array![[1.]]).unwrap();

        assert_eq!(grad, [4., 2.]);
    }

    #[test]
    fn wrong_param_len() {
        let mut layer = Dense::new((2, 2), None);
        let x = array![[1., 1.]];

        let err = layer.forward(&[0.; 4], x.view()).unwrap_err();
        assert_eq!(
            err,
            MlError::ShapeMismatch {
                what: "dense parameters",
                got: 4,
                expected: 6
            }
        );
    }
}
