mod error;
mod manager;
mod mask;
mod partition;
mod partitioner;
pub mod seed;

pub use error::{Result, SimErr};
pub use manager::{SimulationDict, SimulationManager, SimulationSetting};
pub use mask::SimulationMask;
pub use partition::{ClientPartition, DEV, Partition, PartitionEntry, TEST};
pub use partitioner::{DirichletPartitioner, assemble_partition, split_train_dev};
