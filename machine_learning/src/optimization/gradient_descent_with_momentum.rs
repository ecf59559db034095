use ml_core::Result;

use super::{Optimizer, optimizer::check_sizes};

/// Heavy-ball gradient descent: `v = momentum * v + g`, `w -= lr * v`.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<f32>,
}

impl GradientDescentWithMomentum {
    /// Returns a new `GradientDescentWithMomentum` holding a zeroed velocity of `len` entries.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len],
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params)?;
        check_sizes(&self.velocity, params)?;

        for ((p, &g), v) in params.iter_mut().zip(grad).zip(&mut self.velocity) {
            *v = self.momentum * *v + g;
            *p -= self.learning_rate * *v;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_builds_up() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 0.1, 0.9);
        let mut params = [0.];

        optimizer.update_params(&[1.], &mut params).unwrap();
        assert!((params[0] + 0.1).abs() < 1e-6);

        optimizer.update_params(&[1.], &mut params).unwrap();
        assert!((params[0] + 0.1 + 0.19).abs() < 1e-6);
    }
}
