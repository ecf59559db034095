pub mod arch;
pub mod dataset;
pub mod initialization;
pub mod metrics;
pub mod optimization;

pub use ml_core::{MlError, Result};
