use client::{Algorithm, ClientUpdate};
use machine_learning::optimization::{Optimizer, OptimizerSpec};
use rayon::prelude::*;

use crate::Result;

const CHUNK: usize = 4096;

/// Averages the parameters of `updates`, weighting each by its sample count.
///
/// Accumulates in `f64` and splits the parameter vector into chunks that are
/// averaged in parallel.
///
/// # Arguments
/// * `updates` - The updates to average, all holding `len` parameters.
/// * `len` - The length of the parameter vector.
///
/// # Returns
/// `None` if the updates carry no samples at all.
pub fn weighted_mean(updates: &[ClientUpdate], len: usize) -> Option<Vec<f32>> {
    let total: usize = updates.iter().map(ClientUpdate::sample_count).sum();
    if total == 0 {
        return None;
    }

    let total = total as f64;
    let mut mean = vec![0.; len];

    mean.par_chunks_mut(CHUNK)
        .enumerate()
        .for_each(|(i, out)| {
            let start = i * CHUNK;
            let end = start + out.len();
            let mut acc = vec![0f64; out.len()];

            for update in updates {
                let n = update.sample_count() as f64;
                for (a, &w) in acc.iter_mut().zip(&update.params()[start..end]) {
                    *a += n * w as f64;
                }
            }

            for (o, a) in out.iter_mut().zip(acc) {
                *o = (a / total) as f32;
            }
        });

    Some(mean)
}

/// Adds the mean control delta of a round to the server control.
///
/// The sum of the deltas is divided by the whole client population, not by
/// the amount of clients that reported.
pub fn merge_control_deltas<'a, I>(server_control: &mut [f32], deltas: I, num_clients: usize)
where
    I: IntoIterator<Item = &'a [f32]>,
{
    if num_clients == 0 {
        return;
    }

    let mut sum = vec![0f64; server_control.len()];
    for delta in deltas {
        for (s, &d) in sum.iter_mut().zip(delta) {
            *s += d as f64;
        }
    }

    let scale = 1. / num_clients as f64;
    for (c, s) in server_control.iter_mut().zip(sum) {
        *c += (s * scale) as f32;
    }
}

/// How the averaged parameters become the new global parameters.
pub enum ServerAggregator {
    /// The average replaces the global parameters.
    Replace,
    /// A server optimizer steps along the pseudo-gradient `global - average`.
    FedOpt(Box<dyn Optimizer>),
}

impl ServerAggregator {
    /// Returns the aggregator of `algorithm`.
    ///
    /// # Arguments
    /// * `algorithm` - The federated algorithm of the experiment.
    /// * `server_optimizer` - The optimizer used by FedOpt.
    /// * `len` - The length of the parameter vector.
    pub fn for_algorithm(algorithm: Algorithm, server_optimizer: OptimizerSpec, len: usize) -> Self {
        if algorithm.uses_server_optimizer() {
            Self::FedOpt(server_optimizer.build(len))
        } else {
            Self::Replace
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerAggregator::Replace => "replace",
            ServerAggregator::FedOpt(_) => "fed_opt",
        }
    }

    /// Moves `global` towards `averaged`.
    ///
    /// # Errors
    /// Returns a `ServerErr` if the lengths differ.
    pub fn apply(&mut self, global: &mut [f32], averaged: &[f32]) -> Result<()> {
        match self {
            ServerAggregator::Replace => {
                if global.len() != averaged.len() {
                    return Err(ml_core::MlError::ShapeMismatch {
                        what: "averaged parameters",
                        got: averaged.len(),
                        expected: global.len(),
                    }
                    .into());
                }

                global.copy_from_slice(averaged);
            }
            ServerAggregator::FedOpt(optimizer) => {
                let pseudo_grad: Vec<f32> = global
                    .iter()
                    .zip(averaged)
                    .map(|(wg, w)| wg - w)
                    .collect();

                optimizer.update_params(&pseudo_grad, global)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use machine_learning::metrics::Metrics;

    use super::*;

    fn update(id: &str, n: usize, params: Vec<f32>) -> ClientUpdate {
        ClientUpdate::new(id, params, n, Metrics::default(), None)
    }

    #[test]
    fn exact_weighted_mean() {
        let updates = [update("a", 10, vec![1., 1.]), update("b", 30, vec![3., 3.])];
        assert_eq!(weighted_mean(&updates, 2).unwrap(), [2.5, 2.5]);
    }

    #[test]
    fn mean_across_chunks() {
        let len = CHUNK * 2 + 3;
        let updates = [
            update("a", 1, (0..len).map(|i| i as f32).collect()),
            update("b", 1, vec![0.; len]),
        ];

        let mean = weighted_mean(&updates, len).unwrap();
        assert_eq!(mean[len - 1], (len - 1) as f32 / 2.);
        assert_eq!(mean[CHUNK], CHUNK as f32 / 2.);
    }

    #[test]
    fn no_samples_no_mean() {
        assert!(weighted_mean(&[], 2).is_none());
        assert!(weighted_mean(&[update("a", 0, vec![1.])], 1).is_none());
    }

    #[test]
    fn control_divisor_is_the_population() {
        let mut control = vec![0., 1.];
        let deltas = [vec![1., 2.], vec![3., 4.]];

        merge_control_deltas(&mut control, deltas.iter().map(Vec::as_slice), 10);
        assert!((control[0] - 0.4).abs() < 1e-6);
        assert!((control[1] - 1.6).abs() < 1e-6);
    }

    #[test]
    fn fed_opt_with_unit_step_lands_on_the_average() {
        let mut aggregator = ServerAggregator::for_algorithm(
            Algorithm::FedOpt,
            OptimizerSpec::GradientDescent { learning_rate: 1. },
            2,
        );
        assert_eq!(aggregator.kind(), "fed_opt");

        let mut global = vec![1., -2.];
        aggregator.apply(&mut global, &[0.5, 0.25]).unwrap();

        assert!((global[0] - 0.5).abs() < 1e-6);
        assert!((global[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn fed_opt_partial_step() {
        let mut aggregator = ServerAggregator::for_algorithm(
            Algorithm::FedOpt,
            OptimizerSpec::GradientDescent { learning_rate: 0.5 },
            1,
        );

        let mut global = vec![2.];
        aggregator.apply(&mut global, &[0.]).unwrap();
        assert!((global[0] - 1.).abs() < 1e-6);
    }
}
