mod algorithm;
mod error;
mod strategy;
mod trainer;
mod update;

pub use algorithm::Algorithm;
pub use error::{ClientErr, Result};
pub use strategy::{
    ClientContext, Controls, FedAvg, FedProx, FedRs, LocalStrategy, Objective, ObjectiveInput,
    Scaffold, Strategy, StrategyParams,
};
pub use trainer::{ClientTrainer, TrainerConfig};
pub use update::{ClientUpdate, ControlUpdate};
