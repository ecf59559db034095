use std::{collections::BTreeMap, fs, path::Path};

use log::{debug, info};
use ml_core::Target;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    Partition, PartitionEntry, Result, SimErr, SimulationMask,
    partition::{DEV, TEST},
    seed::{seeded_rng, stream},
};

/// Which perturbations to simulate and how strongly.
///
/// A `None` rate disables the perturbation altogether.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSetting {
    /// Probability that a sample loses one of its modalities.
    pub missing_modality_rate: Option<f64>,
    /// Probability that a sample's label is unusable.
    pub missing_label_rate: Option<f64>,
    /// Probability that a sample's label is replaced by a wrong one.
    pub label_noise_level: Option<f64>,
    /// Also drop modalities of the dev and test splits.
    pub eval_missing_modality: bool,
}

impl SimulationSetting {
    /// Checks that every rate is a probability.
    ///
    /// # Errors
    /// Returns `SimErr::InvalidRate` for the first rate outside of `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("missing_modality_rate", self.missing_modality_rate),
            ("missing_label_rate", self.missing_label_rate),
            ("label_noise_level", self.label_noise_level),
        ];

        for (what, rate) in rates {
            if let Some(value) = rate {
                if !(0.0..=1.0).contains(&value) {
                    return Err(SimErr::InvalidRate { what, value });
                }
            }
        }

        Ok(())
    }

    /// Returns whether no perturbation is enabled.
    pub fn is_clean(&self) -> bool {
        self.missing_modality_rate.is_none()
            && self.missing_label_rate.is_none()
            && self.label_noise_level.is_none()
    }

    /// Names the setting, e.g. `mm0.5_ln0.1`, empty when nothing is simulated.
    pub fn setting_str(&self) -> String {
        let parts = [
            ("mm", self.missing_modality_rate),
            ("ml", self.missing_label_rate),
            ("ln", self.label_noise_level),
        ];

        parts
            .iter()
            .filter_map(|(tag, rate)| rate.map(|r| format!("{tag}{r}")))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// The masks of every client of a fold, keyed by client id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulationDict(BTreeMap<String, SimulationMask>);

impl SimulationDict {
    pub fn get(&self, client_id: &str) -> Option<&SimulationMask> {
        self.0.get(client_id)
    }

    pub fn insert(&mut self, client_id: impl Into<String>, mask: SimulationMask) {
        self.0.insert(client_id.into(), mask);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SimulationMask)> {
        self.0.iter()
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

/// Deterministically injects missing modalities, missing labels and label
/// noise into client partitions.
///
/// Every perturbation of every client draws from its own generator, seeded
/// from `(seed, fold, client, perturbation)`, so masks don't depend on call
/// order and enabling one perturbation leaves the others untouched.
#[derive(Debug, Clone)]
pub struct SimulationManager {
    setting: SimulationSetting,
    num_modalities: usize,
    num_classes: usize,
    seed: u64,
}

impl SimulationManager {
    /// Returns a new `SimulationManager`.
    ///
    /// # Arguments
    /// * `setting` - The perturbations to simulate.
    /// * `num_modalities` - The amount of modalities of every sample.
    /// * `num_classes` - The size of the label set.
    /// * `seed` - The base seed of the run.
    ///
    /// # Errors
    /// Returns a `SimErr` if the setting is invalid, there are no modalities
    /// or label noise is requested with fewer than 2 classes.
    pub fn new(
        setting: SimulationSetting,
        num_modalities: usize,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self> {
        setting.validate()?;

        if num_modalities == 0 {
            return Err(SimErr::InvalidSetting("samples need at least one modality"));
        }

        if setting.label_noise_level.is_some() && num_classes < 2 {
            return Err(SimErr::TooFewClasses { got: num_classes });
        }

        Ok(Self {
            setting,
            num_modalities,
            num_classes,
            seed,
        })
    }

    pub fn setting(&self) -> &SimulationSetting {
        &self.setting
    }

    /// Simulates the heterogeneity of one training client.
    ///
    /// # Arguments
    /// * `entries` - The client's samples.
    /// * `fold` - The fold index.
    /// * `client` - The client's index among the training clients.
    ///
    /// # Errors
    /// Returns `SimErr::InvalidLabel` if a label can't be corrupted because it
    /// lies outside the label set.
    pub fn simulate_client(
        &self,
        entries: &[PartitionEntry],
        fold: usize,
        client: usize,
    ) -> Result<SimulationMask> {
        let mut mask = SimulationMask::clean(entries.len(), self.num_modalities);
        let (fold, client) = (fold as u64, client as u64);

        if let Some(rate) = self.setting.missing_modality_rate {
            self.drop_modalities(&mut mask, rate, &[self.seed, fold, client]);
        }

        if let Some(rate) = self.setting.missing_label_rate {
            let mut rng = seeded_rng(&[self.seed, fold, client, stream::MISSING_LABEL]);
            for i in 0..entries.len() {
                if rng.random_bool(rate) {
                    mask.mark_label_missing(i);
                }
            }
        }

        if let Some(level) = self.setting.label_noise_level {
            let mut rng = seeded_rng(&[self.seed, fold, client, stream::LABEL_NOISE]);
            for (i, entry) in entries.iter().enumerate() {
                if rng.random_bool(level) {
                    let noisy = self.noisy_label(entry, &mut rng)?;
                    mask.corrupt_label(i, noisy);
                }
            }
        }

        Ok(mask)
    }

    /// Simulates an evaluation split; labels are never touched and modalities
    /// are only dropped when `eval_missing_modality` is set.
    pub fn simulate_eval(&self, entries: &[PartitionEntry], fold: usize, split: &str) -> SimulationMask {
        let mut mask = SimulationMask::clean(entries.len(), self.num_modalities);

        if let (true, Some(rate)) = (
            self.setting.eval_missing_modality,
            self.setting.missing_modality_rate,
        ) {
            let split_tag = match split {
                DEV => u64::MAX - 1,
                TEST => u64::MAX - 2,
                _ => u64::MAX - 3,
            };
            self.drop_modalities(&mut mask, rate, &[self.seed, fold as u64, split_tag]);
        }

        mask
    }

    /// Simulates every client of a fold's partition, the evaluation splits included.
    pub fn simulate_partition(&self, partition: &Partition, fold: usize) -> Result<SimulationDict> {
        let mut dict = SimulationDict::default();

        for (idx, client) in partition.training_clients().enumerate() {
            let mask = self.simulate_client(&client.entries, fold, idx)?;

            debug!(
                client_id = client.id.as_str(),
                samples = mask.len(),
                missing_modality = mask.missing_modality_count(),
                missing_label = mask.missing_label_count(),
                noisy_label = mask.corrupted_labels().len();
                "simulated client"
            );

            dict.insert(client.id.clone(), mask);
        }

        for split in [DEV, TEST] {
            if let Some(entries) = partition.get(split) {
                dict.insert(split, self.simulate_eval(entries, fold, split));
            }
        }

        info!(
            "simulated fold {fold} with setting '{}' over {} clients",
            self.setting.setting_str(),
            partition.num_training_clients()
        );

        Ok(dict)
    }

    fn drop_modalities(&self, mask: &mut SimulationMask, rate: f64, key: &[u64]) {
        let mut components = key.to_vec();
        components.push(stream::MISSING_MODALITY);
        let mut rng = seeded_rng(&components);

        for i in 0..mask.len() {
            if rng.random_bool(rate) {
                let modality = rng.random_range(0..self.num_modalities);
                mask.mark_modality_missing(i, modality);
            }
        }
    }

    /// Draws a label different from the entry's one.
    fn noisy_label<R: Rng>(&self, entry: &PartitionEntry, rng: &mut R) -> Result<Target> {
        let num_classes = self.num_classes;
        if entry.label.check_range(num_classes).is_err() {
            return Err(SimErr::InvalidLabel {
                key: entry.key.clone(),
                num_classes,
            });
        }

        let noisy = match &entry.label {
            Target::Class(class) => {
                let mut other = rng.random_range(0..num_classes - 1);
                if other >= *class {
                    other += 1;
                }
                Target::Class(other)
            }
            Target::MultiLabel(positives) => {
                let absent: Vec<usize> = (0..num_classes)
                    .filter(|c| !positives.contains(c))
                    .collect();
                let mut next = positives.clone();

                if next.is_empty() {
                    next.push(absent[rng.random_range(0..absent.len())]);
                } else if absent.is_empty() {
                    next.remove(rng.random_range(0..next.len()));
                } else {
                    let swapped = rng.random_range(0..next.len());
                    next[swapped] = absent[rng.random_range(0..absent.len())];
                }

                next.sort_unstable();
                Target::MultiLabel(next)
            }
        };

        Ok(noisy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<PartitionEntry> {
        (0..n)
            .map(|i| PartitionEntry::new(format!("s{i}"), Target::Class(i % 4)))
            .collect()
    }

    fn manager(setting: SimulationSetting) -> SimulationManager {
        SimulationManager::new(setting, 2, 4, 8).unwrap()
    }

    #[test]
    fn setting_names() {
        let setting = SimulationSetting {
            missing_modality_rate: Some(0.5),
            label_noise_level: Some(0.1),
            ..SimulationSetting::default()
        };

        assert_eq!(setting.setting_str(), "mm0.5_ln0.1");
        assert_eq!(SimulationSetting::default().setting_str(), "");
    }

    #[test]
    fn invalid_rate() {
        let setting = SimulationSetting {
            missing_label_rate: Some(1.5),
            ..SimulationSetting::default()
        };

        assert!(matches!(
            SimulationManager::new(setting, 2, 4, 0),
            Err(SimErr::InvalidRate { what: "missing_label_rate", .. })
        ));
    }

    #[test]
    fn noise_needs_two_classes() {
        let setting = SimulationSetting {
            label_noise_level: Some(0.1),
            ..SimulationSetting::default()
        };

        assert!(matches!(
            SimulationManager::new(setting, 1, 1, 0),
            Err(SimErr::TooFewClasses { got: 1 })
        ));
    }

    #[test]
    fn multi_label_noise_changes_the_set() {
        let manager = manager(SimulationSetting {
            label_noise_level: Some(1.0),
            ..SimulationSetting::default()
        });
        let entries = vec![
            PartitionEntry::new("a", Target::MultiLabel(vec![0, 2])),
            PartitionEntry::new("b", Target::MultiLabel(vec![])),
            PartitionEntry::new("c", Target::MultiLabel(vec![0, 1, 2, 3])),
        ];

        let mask = manager.simulate_client(&entries, 1, 0).unwrap();

        for (i, entry) in entries.iter().enumerate() {
            let Target::MultiLabel(noisy) = mask.label_for(i, &entry.label) else {
                panic!("noise changed the task");
            };
            assert_ne!(mask.label_for(i, &entry.label), &entry.label);
            assert!(noisy.iter().all(|&c| c < 4));
        }

        let Target::MultiLabel(swapped) = mask.label_for(0, &entries[0].label) else {
            unreachable!()
        };
        assert_eq!(swapped.len(), 2);
    }

    #[test]
    fn eval_split_keeps_labels() {
        let manager = manager(SimulationSetting {
            missing_modality_rate: Some(1.0),
            missing_label_rate: Some(1.0),
            label_noise_level: Some(1.0),
            eval_missing_modality: false,
        });

        let mask = manager.simulate_eval(&entries(10), 1, DEV);
        assert_eq!(mask, SimulationMask::clean(10, 2));
    }

    #[test]
    fn eval_split_may_drop_modalities() {
        let manager = manager(SimulationSetting {
            missing_modality_rate: Some(1.0),
            missing_label_rate: Some(1.0),
            eval_missing_modality: true,
            ..SimulationSetting::default()
        });

        let mask = manager.simulate_eval(&entries(10), 1, TEST);
        assert_eq!(mask.missing_modality_count(), 10);
        assert_eq!(mask.missing_label_count(), 0);
        assert!(mask.corrupted_labels().is_empty());
    }
}
