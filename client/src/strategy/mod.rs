mod fed_avg;
mod fed_prox;
mod fed_rs;
mod scaffold;

use machine_learning::arch::loss::LossFn;
use ml_core::Batch;
use ndarray::{Array2, ArrayView2};

use crate::{Algorithm, ClientErr, ControlUpdate, Result};
pub use fed_avg::FedAvg;
pub use fed_prox::FedProx;
pub use fed_rs::FedRs;
pub use scaffold::Scaffold;

/// Everything a strategy may look at to score one batch.
pub struct ObjectiveInput<'a> {
    pub logits: ArrayView2<'a, f32>,
    pub batch: &'a Batch,
    pub loss_fn: &'a dyn LossFn,
    /// The current local parameters.
    pub params: &'a [f32],
    /// The global parameters the round started from.
    pub global: &'a [f32],
}

/// The objective value of a batch and its gradient w.r.t. the logits.
#[derive(Debug, Clone)]
pub struct Objective {
    pub loss: f32,
    pub d_logits: Array2<f32>,
}

/// The local side of a federated algorithm.
///
/// The trainer calls `compute_local_objective` for every batch, steps the
/// optimizer, then calls `post_step_hook`; `finish` runs once after the last
/// local epoch.
pub trait LocalStrategy: Send {
    /// Scores a batch.
    ///
    /// Terms of the objective that depend on the parameters directly, rather
    /// than through the logits, add their gradient to `grads`.
    ///
    /// # Errors
    /// Returns a `ClientErr` if shapes don't line up.
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        grads: &mut [f32],
    ) -> Result<Objective>;

    /// Adjusts the parameters after an optimizer step.
    fn post_step_hook(&mut self, _params: &mut [f32], _lr: f32) -> Result<()> {
        Ok(())
    }

    /// Produces the control variate update once local training ends.
    ///
    /// # Arguments
    /// * `global` - The parameters the round started from.
    /// * `params` - The locally optimized parameters.
    /// * `steps` - The amount of optimizer steps taken.
    /// * `lr` - The local learning rate.
    fn finish(
        &mut self,
        _global: &[f32],
        _params: &[f32],
        _steps: usize,
        _lr: f32,
    ) -> Result<Option<ControlUpdate>> {
        Ok(None)
    }
}

/// The plain supervised objective shared by every strategy.
fn task_objective(input: &ObjectiveInput<'_>) -> Result<Objective> {
    let mask = input.batch.label_mask();
    let labels = input.batch.labels();

    let loss = input.loss_fn.loss(input.logits, labels, mask)?;
    let d_logits = input.loss_fn.loss_prime(input.logits, labels, mask)?;

    Ok(Objective { loss, d_logits })
}

/// Hyperparameters of the local objectives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    /// FedProx proximal weight.
    pub mu: f32,
    /// FedRS scale of absent classes.
    pub fedrs_alpha: f32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            mu: 0.001,
            fedrs_alpha: 0.5,
        }
    }
}

/// Copies of the SCAFFOLD control variates handed to a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub server: Vec<f32>,
    pub client: Vec<f32>,
}

/// What a strategy may know about the client it trains.
#[derive(Debug, Clone, Default)]
pub struct ClientContext<'a> {
    /// Usable labels per class in the client's data.
    pub class_counts: &'a [usize],
    pub controls: Option<Controls>,
}

/// Runtime-selectable local strategy.
pub enum Strategy {
    FedAvg(FedAvg),
    FedProx(FedProx),
    Scaffold(Scaffold),
    FedRs(FedRs),
}

impl Strategy {
    /// Builds a client's strategy for the experiment's algorithm.
    ///
    /// # Args
    /// * `algorithm` - The federated algorithm of the experiment.
    /// * `params` - The local objective hyperparameters.
    /// * `ctx` - What is known about the client.
    ///
    /// # Returns
    /// A concrete strategy; FedOpt trains locally like FedAvg.
    ///
    /// # Errors
    /// Returns `ClientErr::MissingControl` if SCAFFOLD gets no control variates.
    pub fn select(algorithm: Algorithm, params: StrategyParams, ctx: ClientContext<'_>) -> Result<Self> {
        Ok(match algorithm {
            Algorithm::FedAvg | Algorithm::FedOpt => Self::FedAvg(FedAvg),
            Algorithm::FedProx => Self::FedProx(FedProx::new(params.mu)),
            Algorithm::Scaffold => {
                let controls = ctx.controls.ok_or(ClientErr::MissingControl)?;
                Self::Scaffold(Scaffold::new(controls.server, controls.client)?)
            }
            Algorithm::FedRs => Self::FedRs(FedRs::new(ctx.class_counts, params.fedrs_alpha)),
        })
    }

    /// Returns a stable identifier for the strategy kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::FedAvg(_) => "fed_avg",
            Strategy::FedProx(_) => "fed_prox",
            Strategy::Scaffold(_) => "scaffold",
            Strategy::FedRs(_) => "fed_rs",
        }
    }
}

impl LocalStrategy for Strategy {
    fn compute_local_objective(
        &mut self,
        input: ObjectiveInput<'_>,
        grads: &mut [f32],
    ) -> Result<Objective> {
        match self {
            Strategy::FedAvg(s) => s.compute_local_objective(input, grads),
            Strategy::FedProx(s) => s.compute_local_objective(input, grads),
            Strategy::Scaffold(s) => s.compute_local_objective(input, grads),
            Strategy::FedRs(s) => s.compute_local_objective(input, grads),
        }
    }

    fn post_step_hook(&mut self, params: &mut [f32], lr: f32) -> Result<()> {
        match self {
            Strategy::FedAvg(s) => s.post_step_hook(params, lr),
            Strategy::FedProx(s) => s.post_step_hook(params, lr),
            Strategy::Scaffold(s) => s.post_step_hook(params, lr),
            Strategy::FedRs(s) => s.post_step_hook(params, lr),
        }
    }

    fn finish(
        &mut self,
        global: &[f32],
        params: &[f32],
        steps: usize,
        lr: f32,
    ) -> Result<Option<ControlUpdate>> {
        match self {
            Strategy::FedAvg(s) => s.finish(global, params, steps, lr),
            Strategy::FedProx(s) => s.finish(global, params, steps, lr),
            Strategy::Scaffold(s) => s.finish(global, params, steps, lr),
            Strategy::FedRs(s) => s.finish(global, params, steps, lr),
        }
    }
}
