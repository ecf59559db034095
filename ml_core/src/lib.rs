mod data;
mod error;
mod model;
mod stats;

pub use data::{Batch, Labels, Target, TaskKind};
pub use error::{MlError, Result};
pub use model::Model;
pub use stats::StepStats;
