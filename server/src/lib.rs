mod aggregation;
mod coordinator;
mod error;
mod evaluation;
mod history;
mod schedule;
mod state;

pub use aggregation::{ServerAggregator, merge_control_deltas, weighted_mean};
pub use coordinator::ServerCoordinator;
pub use error::{Result, ServerErr};
pub use evaluation::evaluate;
pub use history::{FoldResult, RoundLog, RoundRecord, Selection, SkipReason, SkippedClient, Split};
pub use schedule::ClientSampleSchedule;
pub use state::ServerState;
