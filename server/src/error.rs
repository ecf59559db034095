use std::{error::Error, fmt};

use ml_core::MlError;

use crate::Split;

/// The server module's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Coordination and aggregation failures.
#[derive(Debug)]
pub enum ServerErr {
    Ml(MlError),
    ShapeMismatch {
        client_id: String,
        round: usize,
        got: usize,
        expected: usize,
    },
    RoundNotInitialized,
    RoundMismatch {
        expected: usize,
        got: usize,
    },
    DuplicateUpdate {
        client_id: String,
        round: usize,
    },
    MissingControl {
        client_id: String,
        round: usize,
    },
    EmptyEvaluation(Split),
    ZeroWeight {
        round: usize,
    },
    InvalidSampleRate(f64),
    NoSchedule,
    RoundOutOfSchedule {
        round: usize,
        rounds: usize,
    },
    NothingEvaluated,
}

impl fmt::Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErr::Ml(e) => write!(f, "model error: {e}"),
            ServerErr::ShapeMismatch {
                client_id,
                round,
                got,
                expected,
            } => write!(
                f,
                "client {client_id} sent {got} parameters at round {round}, expected {expected}"
            ),
            ServerErr::RoundNotInitialized => write!(f, "no round has been initialized"),
            ServerErr::RoundMismatch { expected, got } => {
                write!(f, "update for round {got} while round {expected} is open")
            }
            ServerErr::DuplicateUpdate { client_id, round } => {
                write!(f, "client {client_id} already reported at round {round}")
            }
            ServerErr::MissingControl { client_id, round } => write!(
                f,
                "client {client_id} reported no control update at round {round}"
            ),
            ServerErr::EmptyEvaluation(split) => write!(f, "the {split} split has no samples"),
            ServerErr::ZeroWeight { round } => {
                write!(f, "updates of round {round} carry no samples")
            }
            ServerErr::InvalidSampleRate(rate) => {
                write!(f, "sample rate must be in (0, 1], got {rate}")
            }
            ServerErr::NoSchedule => write!(f, "clients were not sampled yet"),
            ServerErr::RoundOutOfSchedule { round, rounds } => {
                write!(f, "round {round} is outside of the {rounds} scheduled rounds")
            }
            ServerErr::NothingEvaluated => write!(f, "no round was evaluated on test"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ServerErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlError> for ServerErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}
