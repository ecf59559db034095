use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type of the simulation crate.
pub type Result<T> = std::result::Result<T, SimErr>;

/// The simulation crate's error type.
#[derive(Debug)]
pub enum SimErr {
    /// A probability outside of `[0, 1]` or a non finite value.
    InvalidRate { what: &'static str, value: f64 },
    /// Label noise needs an alternative class to move to.
    TooFewClasses { got: usize },
    /// A setting that can't be simulated, e.g. zero modalities or clients.
    InvalidSetting(&'static str),
    /// Two partition entries share a client id.
    DuplicateClient(String),
    /// A sample references a class outside the label set.
    InvalidLabel { key: String, num_classes: usize },
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for SimErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimErr::InvalidRate { what, value } => {
                write!(f, "{what} must be a probability in [0, 1], got {value}")
            }
            SimErr::TooFewClasses { got } => {
                write!(f, "label noise needs at least 2 classes, got {got}")
            }
            SimErr::InvalidSetting(msg) => write!(f, "invalid simulation setting: {msg}"),
            SimErr::DuplicateClient(id) => write!(f, "client {id} appears twice in the partition"),
            SimErr::InvalidLabel { key, num_classes } => {
                write!(f, "sample {key} has a label outside of {num_classes} classes")
            }
            SimErr::Io(e) => write!(f, "io error: {e}"),
            SimErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for SimErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimErr::Io(e) => Some(e),
            SimErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SimErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SimErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
