use std::{collections::BTreeMap, fs, path::Path};

use machine_learning::dataset::{Dataset, Sample};
use ml_core::TaskKind;
use serde::{Deserialize, Serialize};
use simulation::{Partition, PartitionEntry, SimulationMask};

use crate::{
    config::DatasetConfig,
    error::{ExperimentError, Result},
    synthetic,
};

/// Looks up the per-modality features of a sample by key.
pub trait FeatureSource {
    fn features(&self, key: &str) -> Option<&[Vec<f32>]>;
}

/// Sample features held in memory, one vector per modality.
///
/// Stored as JSON objects mapping a key to its feature vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureStore(BTreeMap<String, Vec<Vec<f32>>>);

impl FeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, features: Vec<Vec<f32>>) {
        self.0.insert(key.into(), features);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

impl FeatureSource for FeatureStore {
    fn features(&self, key: &str) -> Option<&[Vec<f32>]> {
        self.0.get(key).map(Vec::as_slice)
    }
}

/// The shape of every sample of an experiment.
///
/// `modalities[i]` is the stored modality fed to the model's `i`-th
/// encoder, whose width is `dims[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataShape {
    pub modalities: Vec<usize>,
    pub dims: Vec<usize>,
    pub task: TaskKind,
    pub num_classes: usize,
}

/// The partition and features of one fold.
#[derive(Debug, Clone)]
pub struct FoldData {
    pub partition: Partition,
    pub features: FeatureStore,
}

/// Loads or generates the data of `fold`.
///
/// # Errors
/// Returns an `ExperimentError` if a file can't be read or parsed, or
/// generation fails.
pub fn load_fold(config: &DatasetConfig, seed: u64, fold: usize) -> Result<FoldData> {
    match config {
        DatasetConfig::Synthetic(cfg) => synthetic::generate(cfg, seed, fold),
        DatasetConfig::Files {
            partitions,
            features,
            ..
        } => {
            let path = partitions.get(fold).ok_or_else(|| {
                ExperimentError::InvalidConfig(format!("no partition file for fold {fold}"))
            })?;

            Ok(FoldData {
                partition: Partition::from_json_file(path)?,
                features: FeatureStore::from_json_file(features)?,
            })
        }
    }
}

/// Materializes a client's or split's samples with its simulation applied.
///
/// Only the modalities selected by `shape` are kept. Missing modalities are
/// replaced with zeros of the declared width, noisy labels replace the
/// original ones and masked labels are excluded from the supervised loss.
///
/// # Errors
/// Returns `ExperimentError::MissingFeatures` if a key is unknown, or an
/// `ExperimentError` if a sample doesn't fit `shape`.
pub fn build_dataset<F: FeatureSource + ?Sized>(
    entries: &[PartitionEntry],
    mask: Option<&SimulationMask>,
    source: &F,
    shape: &DataShape,
) -> Result<Dataset> {
    let mut samples = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let features = source
            .features(&entry.key)
            .ok_or_else(|| ExperimentError::MissingFeatures {
                key: entry.key.clone(),
            })?;

        let mut selected = Vec::with_capacity(shape.modalities.len());
        for (&m, &dim) in shape.modalities.iter().zip(&shape.dims) {
            let values = features
                .get(m)
                .ok_or_else(|| ExperimentError::MissingModality {
                    key: entry.key.clone(),
                    modality: m,
                })?;

            selected.push(match mask {
                Some(mask) if !mask.modality_present(i, m) => vec![0.; dim],
                _ => values.clone(),
            });
        }

        let (target, labeled) = match mask {
            Some(mask) => (mask.label_for(i, &entry.label).clone(), mask.label_present(i)),
            None => (entry.label.clone(), true),
        };

        samples.push(Sample::new(selected, target, labeled));
    }

    Ok(Dataset::new(
        samples,
        shape.dims.clone(),
        shape.task,
        shape.num_classes,
    )?)
}
