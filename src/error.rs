use std::{fmt, io};

use client::ClientErr;
use machine_learning::initialization::RandErr;
use ml_core::MlError;
use server::ServerErr;
use simulation::SimErr;

/// The experiment runner's result type.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// All errors that can occur while running an experiment.
#[derive(Debug)]
pub enum ExperimentError {
    /// Invalid configuration, caught before any fold runs.
    InvalidConfig(String),
    /// A partition entry references a sample the feature store doesn't hold.
    MissingFeatures { key: String },
    /// A sample holds fewer modalities than the experiment selects.
    MissingModality { key: String, modality: usize },
    /// An evaluation split is absent from the partition.
    MissingSplit(&'static str),
    Ml(MlError),
    Init(RandErr),
    Simulation(SimErr),
    Client(ClientErr),
    Server(ServerErr),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ExperimentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::MissingFeatures { key } => write!(f, "no features for sample {key}"),
            Self::MissingModality { key, modality } => {
                write!(f, "sample {key} has no modality {modality}")
            }
            Self::MissingSplit(split) => write!(f, "the partition has no {split} split"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Init(e) => write!(f, "initialization error: {e}"),
            Self::Simulation(e) => write!(f, "simulation error: {e}"),
            Self::Client(e) => write!(f, "client error: {e}"),
            Self::Server(e) => write!(f, "server error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for ExperimentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Init(e) => Some(e),
            Self::Simulation(e) => Some(e),
            Self::Client(e) => Some(e),
            Self::Server(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlError> for ExperimentError {
    fn from(e: MlError) -> Self {
        Self::Ml(e)
    }
}

impl From<RandErr> for ExperimentError {
    fn from(e: RandErr) -> Self {
        Self::Init(e)
    }
}

impl From<SimErr> for ExperimentError {
    fn from(e: SimErr) -> Self {
        Self::Simulation(e)
    }
}

impl From<ClientErr> for ExperimentError {
    fn from(e: ClientErr) -> Self {
        Self::Client(e)
    }
}

impl From<ServerErr> for ExperimentError {
    fn from(e: ServerErr) -> Self {
        Self::Server(e)
    }
}

impl From<io::Error> for ExperimentError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ExperimentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
