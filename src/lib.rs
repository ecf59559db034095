pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod results;
pub mod synthetic;

pub use config::{DatasetConfig, ExperimentConfig, OptimizerKind, SyntheticConfig};
pub use error::{ExperimentError, Result};
pub use experiment::{run, run_fold};
pub use results::{ExperimentResult, FoldOutcome};
