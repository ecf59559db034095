use std::{error::Error, fmt};

use ml_core::MlError;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Local training failures.
#[derive(Debug)]
pub enum ClientErr {
    Ml(MlError),
    EmptyDataset {
        client_id: String,
    },
    NonFiniteLoss {
        client_id: String,
        round: usize,
        epoch: usize,
        batch: usize,
    },
    ParamsLengthMismatch {
        client_id: String,
        got: usize,
        expected: usize,
    },
    ControlLengthMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    MissingControl,
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::Ml(e) => write!(f, "model error: {e}"),
            ClientErr::EmptyDataset { client_id } => {
                write!(f, "client {client_id} has no samples to train on")
            }
            ClientErr::NonFiniteLoss {
                client_id,
                round,
                epoch,
                batch,
            } => write!(
                f,
                "non finite loss for client {client_id} at round {round}, epoch {epoch}, batch {batch}"
            ),
            ClientErr::ParamsLengthMismatch {
                client_id,
                got,
                expected,
            } => write!(
                f,
                "parameters length mismatch for client {client_id}: got {got}, expected {expected}"
            ),
            ClientErr::ControlLengthMismatch {
                what,
                got,
                expected,
            } => write!(f, "{what} length mismatch: got {got}, expected {expected}"),
            ClientErr::MissingControl => {
                write!(f, "control variates are required by this algorithm")
            }
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlError> for ClientErr {
    fn from(value: MlError) -> Self {
        Self::Ml(value)
    }
}
