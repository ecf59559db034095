use std::num::NonZeroUsize;

use log::{debug, trace};
use machine_learning::{
    arch::loss::LossFn,
    dataset::Dataset,
    metrics::{Metrics, MetricsAccumulator},
    optimization::OptimizerSpec,
};
use ml_core::{Model, StepStats};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    ClientErr, ClientUpdate, Result,
    strategy::{LocalStrategy, ObjectiveInput},
};

/// Local training hyperparameters, shared by every client of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub local_epochs: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub optimizer: OptimizerSpec,
}

/// Runs a client's local optimization, starting from the global parameters.
///
/// The trainer never holds on to parameters between rounds: each call to
/// `train` copies the global parameters and hands the result back in a
/// `ClientUpdate`.
pub struct ClientTrainer<M: Model, L: LossFn, R: Rng> {
    model: M,
    loss_fn: L,
    config: TrainerConfig,
    rng: R,
}

impl<M: Model, L: LossFn, R: Rng> ClientTrainer<M, L, R> {
    /// Returns a new `ClientTrainer`.
    ///
    /// # Arguments
    /// * `model` - The classifier to optimize.
    /// * `loss_fn` - The supervised loss of the task.
    /// * `config` - The local training hyperparameters.
    /// * `rng` - The generator used to shuffle the local data.
    pub fn new(model: M, loss_fn: L, config: TrainerConfig, rng: R) -> Self {
        Self {
            model,
            loss_fn,
            config,
            rng,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Trains locally for the configured amount of epochs.
    ///
    /// # Arguments
    /// * `client_id` - The id of the client being trained.
    /// * `round` - The current global round.
    /// * `global` - The parameters broadcast by the server.
    /// * `dataset` - The client's local data, reshuffled every epoch.
    /// * `strategy` - The local side of the federated algorithm.
    ///
    /// # Returns
    /// The locally optimized parameters, the sample count, the epoch-averaged
    /// metrics and, for SCAFFOLD, the control variate update.
    ///
    /// # Errors
    /// Returns a `ClientErr` if the dataset is empty, the parameters don't fit
    /// the model or a batch produces a non finite loss.
    pub fn train<S: LocalStrategy + ?Sized>(
        &mut self,
        client_id: &str,
        round: usize,
        global: &[f32],
        dataset: &mut Dataset,
        strategy: &mut S,
    ) -> Result<ClientUpdate> {
        let num_params = self.model.num_params();
        if global.len() != num_params {
            return Err(ClientErr::ParamsLengthMismatch {
                client_id: client_id.to_string(),
                got: global.len(),
                expected: num_params,
            });
        }

        if dataset.is_empty() {
            return Err(ClientErr::EmptyDataset {
                client_id: client_id.to_string(),
            });
        }

        let lr = self.config.optimizer.learning_rate();
        let mut optimizer = self.config.optimizer.build(num_params);
        let mut params = global.to_vec();
        let mut grads = vec![0.; num_params];
        let mut steps = 0;
        let mut epochs = Vec::with_capacity(self.config.local_epochs.get());

        for epoch in 0..self.config.local_epochs.get() {
            dataset.shuffle(&mut self.rng);
            let mut acc = MetricsAccumulator::new(dataset.task(), dataset.num_classes());

            for (b, batch) in dataset.batches(self.config.batch_size).enumerate() {
                let batch = batch?;
                grads.fill(0.);

                let logits = self.model.forward(&params, &batch)?;
                let objective = strategy.compute_local_objective(
                    ObjectiveInput {
                        logits: logits.view(),
                        batch: &batch,
                        loss_fn: &self.loss_fn,
                        params: &params,
                        global,
                    },
                    &mut grads,
                )?;

                if !objective.loss.is_finite() {
                    return Err(ClientErr::NonFiniteLoss {
                        client_id: client_id.to_string(),
                        round,
                        epoch,
                        batch: b,
                    });
                }

                self.model
                    .backward(&params, objective.d_logits.view(), &mut grads)?;
                optimizer.update_params(&grads, &mut params)?;
                strategy.post_step_hook(&mut params, lr)?;
                steps += 1;

                let stats = StepStats::new(batch.len(), batch.labeled(), objective.loss);
                trace!(
                    client_id = client_id, epoch = epoch, batch = b,
                    samples = stats.samples(), labeled = stats.labeled(), loss = stats.loss();
                    "local step"
                );

                acc.push(logits.view(), &batch, stats.loss())?;
            }

            let metrics = acc.finish();
            debug!(
                client_id = client_id, round = round, epoch = epoch, loss = metrics.loss;
                "local epoch finished"
            );
            epochs.push(metrics);
        }

        let mut metrics = Metrics::mean(&epochs).unwrap_or_default();
        metrics.samples = dataset.len();

        let control = strategy.finish(global, &params, steps, lr)?;

        Ok(ClientUpdate::new(
            client_id,
            params,
            dataset.len(),
            metrics,
            control,
        ))
    }
}
