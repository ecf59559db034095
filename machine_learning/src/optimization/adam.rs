use ml_core::Result;

use super::{Optimizer, optimizer::check_sizes};

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    first_moment: Vec<f32>,
    second_moment: Vec<f32>,
}

impl Adam {
    /// Returns a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters whose moments are tracked.
    /// * `learning_rate` - The step size.
    /// * `beta1` - Decay rate of the first moment.
    /// * `beta2` - Decay rate of the second moment.
    /// * `epsilon` - Added to the denominator for numerical stability.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            step: 0,
            first_moment: vec![0.; len],
            second_moment: vec![0.; len],
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(&self.first_moment, params)?;

        self.step = self.step.saturating_add(1);
        let correction1 = 1. - self.beta1.powi(self.step);
        let correction2 = 1. - self.beta2.powi(self.step);
        let (b1, b2) = (self.beta1, self.beta2);

        for (i, (p, &g)) in params.iter_mut().zip(grad).enumerate() {
            let m = &mut self.first_moment[i];
            let v = &mut self.second_moment[i];
            *m = b1 * *m + (1. - b1) * g;
            *v = b2 * *v + (1. - b2) * g * g;

            let m_hat = *m / correction1;
            let v_hat = *v / correction2;
            *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_each_param_by_the_learning_rate() {
        let mut optimizer = Adam::new(2, 0.01, 0.9, 0.999, 1e-8);
        let mut params = [1., 1.];

        optimizer.update_params(&[4., -0.5], &mut params).unwrap();
        assert!((params[0] - 0.99).abs() < 1e-5);
        assert!((params[1] - 1.01).abs() < 1e-5);
    }

    #[test]
    fn rejects_wrong_length() {
        let mut optimizer = Adam::new(3, 0.01, 0.9, 0.999, 1e-8);
        let mut params = [0.; 2];

        assert!(optimizer.update_params(&[1., 1.], &mut params).is_err());
    }
}
