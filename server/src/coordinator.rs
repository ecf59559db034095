use std::num::NonZeroUsize;

use client::{Algorithm, ClientUpdate, Controls};
use log::{debug, info, warn};
use machine_learning::{
    arch::loss::LossFn,
    dataset::Dataset,
    metrics::Metrics,
    optimization::OptimizerSpec,
};
use ml_core::Model;

use crate::{
    ClientSampleSchedule, FoldResult, Result, RoundLog, Selection, ServerAggregator, ServerErr,
    ServerState, SkipReason, SkippedClient, Split, aggregation, evaluate,
};

/// Drives the rounds of one fold.
///
/// Owns the global state, the sampling schedule, the updates of the open
/// round and the metric history. Rounds follow the sequence
/// `initialize_epoch_updates` → `save_train_updates`* → `average_weights`.
pub struct ServerCoordinator {
    algorithm: Algorithm,
    state: ServerState,
    aggregator: ServerAggregator,
    num_clients: usize,
    schedule: Option<ClientSampleSchedule>,
    round: Option<usize>,
    updates: Vec<ClientUpdate>,
    skipped: Vec<SkippedClient>,
    log: RoundLog,
}

impl ServerCoordinator {
    /// Returns a new `ServerCoordinator`.
    ///
    /// # Arguments
    /// * `algorithm` - The federated algorithm of the experiment.
    /// * `initial` - The initial global parameters.
    /// * `num_clients` - The size of the training population.
    /// * `server_optimizer` - The optimizer FedOpt steps the global parameters with.
    pub fn new(
        algorithm: Algorithm,
        initial: Vec<f32>,
        num_clients: usize,
        server_optimizer: OptimizerSpec,
    ) -> Self {
        let len = initial.len();

        Self {
            algorithm,
            state: ServerState::new(initial, algorithm.uses_control_variates()),
            aggregator: ServerAggregator::for_algorithm(algorithm, server_optimizer, len),
            num_clients,
            schedule: None,
            round: None,
            updates: Vec::new(),
            skipped: Vec::new(),
            log: RoundLog::new(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn num_clients(&self) -> usize {
        self.num_clients
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn global_params(&self) -> &[f32] {
        self.state.global()
    }

    pub fn log(&self) -> &RoundLog {
        &self.log
    }

    /// Draws the clients of every round up front.
    ///
    /// # Arguments
    /// * `sample_rate` - The fraction of the population sampled per round.
    /// * `num_rounds` - The amount of rounds of the fold.
    /// * `seed` - The seed of the draw.
    ///
    /// # Errors
    /// Returns `ServerErr::InvalidSampleRate` for rates outside of `(0, 1]`.
    pub fn sample_clients(
        &mut self,
        sample_rate: f64,
        num_rounds: usize,
        seed: u64,
    ) -> Result<&ClientSampleSchedule> {
        let schedule = ClientSampleSchedule::new(self.num_clients, sample_rate, num_rounds, seed)?;
        info!(
            clients = self.num_clients, per_round = schedule.per_round(), rounds = num_rounds;
            "sampled clients"
        );

        Ok(self.schedule.insert(schedule))
    }

    /// Returns the client indices scheduled for `round`.
    ///
    /// # Errors
    /// Returns a `ServerErr` if clients weren't sampled or the round is out of the schedule.
    pub fn clients_for_round(&self, round: usize) -> Result<&[usize]> {
        self.schedule.as_ref().ok_or(ServerErr::NoSchedule)?.clients(round)
    }

    /// Opens `round`, dropping whatever the previous round left behind.
    pub fn initialize_epoch_updates(&mut self, round: usize) {
        self.round = Some(round);
        self.updates.clear();
        self.skipped.clear();
    }

    /// Returns the control variates handed to a client, SCAFFOLD only.
    ///
    /// A client that never reported starts from a zero control.
    pub fn controls_for(&self, client_id: &str) -> Option<Controls> {
        let server = self.state.server_control()?.to_vec();
        let client = self
            .state
            .client_control(client_id)
            .map(<[f32]>::to_vec)
            .unwrap_or_else(|| vec![0.; server.len()]);

        Some(Controls { server, client })
    }

    fn open_round(&self, round: usize) -> Result<usize> {
        match self.round {
            None => Err(ServerErr::RoundNotInitialized),
            Some(open) if open != round => Err(ServerErr::RoundMismatch {
                expected: open,
                got: round,
            }),
            Some(open) => Ok(open),
        }
    }

    /// Stores one client's result for the open round.
    ///
    /// # Errors
    /// Returns a `ServerErr` if `round` isn't the open round, the parameters
    /// or control don't match the global state, the client already reported,
    /// or SCAFFOLD gets no control update.
    pub fn save_train_updates(&mut self, round: usize, update: ClientUpdate) -> Result<()> {
        let round = self.open_round(round)?;
        let expected = self.state.num_params();
        let client_id = update.client_id();

        if update.params().len() != expected {
            return Err(ServerErr::ShapeMismatch {
                client_id: client_id.to_string(),
                round,
                got: update.params().len(),
                expected,
            });
        }

        if self.updates.iter().any(|u| u.client_id() == client_id) {
            return Err(ServerErr::DuplicateUpdate {
                client_id: client_id.to_string(),
                round,
            });
        }

        if self.algorithm.uses_control_variates() {
            let control = update.control().ok_or_else(|| ServerErr::MissingControl {
                client_id: client_id.to_string(),
                round,
            })?;

            for got in [control.delta().len(), control.client_control().len()] {
                if got != expected {
                    return Err(ServerErr::ShapeMismatch {
                        client_id: client_id.to_string(),
                        round,
                        got,
                        expected,
                    });
                }
            }
        }

        debug!(
            client_id = client_id, round = round, samples = update.sample_count();
            "saved client update"
        );
        self.updates.push(update);
        Ok(())
    }

    /// Records a sampled client that couldn't train this round.
    ///
    /// # Errors
    /// Returns `ServerErr::RoundNotInitialized` if no round is open.
    pub fn record_skip(&mut self, client_id: &str, reason: SkipReason) -> Result<()> {
        let round = self.round.ok_or(ServerErr::RoundNotInitialized)?;
        warn!(client_id = client_id, round = round; "skipping client: {reason:?}");

        self.skipped.push(SkippedClient {
            client_id: client_id.to_string(),
            reason,
        });
        Ok(())
    }

    /// Aggregates the updates of the open round into the global state.
    ///
    /// Consumes the round's updates and closes the round. A round without
    /// updates leaves the state untouched.
    ///
    /// # Returns
    /// The sample-weighted mean of the clients' local metrics, `None` if no
    /// client reported.
    ///
    /// # Errors
    /// Returns a `ServerErr` if no round is open or the updates carry no samples.
    pub fn average_weights(&mut self) -> Result<Option<Metrics>> {
        let round = self.round.take().ok_or(ServerErr::RoundNotInitialized)?;
        let mut updates = std::mem::take(&mut self.updates);
        let skipped = std::mem::take(&mut self.skipped);

        let skip_list = skipped
            .iter()
            .map(|s| s.client_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        info!(round = round, reported = updates.len(), skipped = skip_list.as_str(); "closing round");
        self.log.record_skips(round, skipped);

        if updates.is_empty() {
            warn!(round = round; "no client reported, aggregation skipped");
            return Ok(None);
        }

        let averaged = aggregation::weighted_mean(&updates, self.state.num_params())
            .ok_or(ServerErr::ZeroWeight { round })?;
        self.aggregator.apply(self.state.global_mut(), &averaged)?;

        if let Some(server_control) = self.state.server_control_mut() {
            aggregation::merge_control_deltas(
                server_control,
                updates.iter().filter_map(|u| u.control()).map(|c| c.delta()),
                self.num_clients,
            );
        }

        for update in &mut updates {
            if let Some(control) = update.take_control() {
                self.state
                    .set_client_control(update.client_id(), control.into_client_control());
            }
        }

        let train = Metrics::weighted_mean(updates.iter().map(ClientUpdate::metrics));
        if let Some(train) = train {
            info!(
                round = round, loss = train.loss, samples = train.samples, aggregator = self.aggregator.kind();
                "aggregated round"
            );
            self.log.record(round, Split::Train, train);
        }

        Ok(train)
    }

    /// Evaluates the global parameters on `dataset`.
    ///
    /// # Errors
    /// Returns `ServerErr::EmptyEvaluation` for an empty split, or a
    /// `ServerErr` if the data doesn't fit the model.
    pub fn inference<M, L>(
        &self,
        model: &mut M,
        loss_fn: &L,
        dataset: &Dataset,
        split: Split,
        batch_size: NonZeroUsize,
    ) -> Result<Metrics>
    where
        M: Model,
        L: LossFn + ?Sized,
    {
        if dataset.is_empty() {
            return Err(ServerErr::EmptyEvaluation(split));
        }

        evaluate(model, loss_fn, self.state.global(), dataset, batch_size)
    }

    /// Stores evaluation metrics of `round`.
    pub fn record_evaluation(&mut self, round: usize, split: Split, metrics: Metrics) {
        info!(
            round = round, split = split.as_str(), loss = metrics.loss,
            acc = metrics.acc.unwrap_or(f32::NAN), uar = metrics.uar.unwrap_or(f32::NAN),
            macro_f = metrics.macro_f.unwrap_or(f32::NAN);
            "evaluated"
        );
        self.log.record(round, split, metrics);
    }

    /// Collapses the fold's history to a single result.
    ///
    /// # Errors
    /// Returns `ServerErr::NothingEvaluated` if no round was evaluated on test.
    pub fn summarize(&self, selection: Selection) -> Result<FoldResult> {
        self.log.summarize(selection)
    }

    /// Returns the fold's history, consuming the coordinator.
    pub fn into_log(self) -> RoundLog {
        self.log
    }
}
