use std::collections::BTreeMap;

use ml_core::Target;
use serde::{Deserialize, Serialize};

/// The simulated heterogeneity of one client.
///
/// Indexed by the position of a sample in the client's partition entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationMask {
    modality_present: Vec<Vec<bool>>,
    label_present: Vec<bool>,
    corrupted_labels: BTreeMap<usize, Target>,
}

impl SimulationMask {
    /// Returns a mask that leaves every sample untouched.
    pub fn clean(num_samples: usize, num_modalities: usize) -> Self {
        Self {
            modality_present: vec![vec![true; num_modalities]; num_samples],
            label_present: vec![true; num_samples],
            corrupted_labels: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.label_present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_present.is_empty()
    }

    /// Returns the presence flag of every modality of a sample.
    pub fn modalities(&self, sample: usize) -> &[bool] {
        self.modality_present
            .get(sample)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn modality_present(&self, sample: usize, modality: usize) -> bool {
        self.modalities(sample).get(modality).copied().unwrap_or(true)
    }

    pub fn label_present(&self, sample: usize) -> bool {
        self.label_present.get(sample).copied().unwrap_or(true)
    }

    /// Returns the label a sample is trained on, the corrupted one if any.
    pub fn label_for<'a>(&'a self, sample: usize, original: &'a Target) -> &'a Target {
        self.corrupted_labels.get(&sample).unwrap_or(original)
    }

    pub fn corrupted_labels(&self) -> &BTreeMap<usize, Target> {
        &self.corrupted_labels
    }

    /// Counts the samples with at least one absent modality.
    pub fn missing_modality_count(&self) -> usize {
        self.modality_present
            .iter()
            .filter(|flags| flags.iter().any(|present| !present))
            .count()
    }

    pub fn missing_label_count(&self) -> usize {
        self.label_present.iter().filter(|present| !**present).count()
    }

    pub(crate) fn mark_modality_missing(&mut self, sample: usize, modality: usize) {
        if let Some(flag) = self
            .modality_present
            .get_mut(sample)
            .and_then(|flags| flags.get_mut(modality))
        {
            *flag = false;
        }
    }

    pub(crate) fn mark_label_missing(&mut self, sample: usize) {
        if let Some(flag) = self.label_present.get_mut(sample) {
            *flag = false;
        }
    }

    pub(crate) fn corrupt_label(&mut self, sample: usize, label: Target) {
        self.corrupted_labels.insert(sample, label);
    }
}
