use std::{fs, num::NonZeroUsize, path::{Path, PathBuf}};

use client::{Algorithm, StrategyParams, TrainerConfig};
use machine_learning::{arch::Fusion, metrics::MetricName, optimization::OptimizerSpec};
use ml_core::TaskKind;
use serde::{Deserialize, Serialize};
use simulation::SimulationSetting;

use crate::error::{ExperimentError, Result};

/// The optimizers selectable for local and server updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    GradientDescent,
    Momentum,
    Adam,
}

impl OptimizerKind {
    /// Describes this optimizer with `lr` and the usual defaults for the rest.
    pub fn spec(self, lr: f32) -> OptimizerSpec {
        match self {
            OptimizerKind::GradientDescent => OptimizerSpec::GradientDescent { learning_rate: lr },
            OptimizerKind::Momentum => OptimizerSpec::GradientDescentWithMomentum {
                learning_rate: lr,
                momentum: 0.9,
            },
            OptimizerKind::Adam => OptimizerSpec::Adam {
                learning_rate: lr,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            },
        }
    }
}

/// A generated dataset of gaussian class clusters, one cluster per class
/// and modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub num_clients: usize,
    pub samples_per_client: usize,
    pub test_samples: usize,
    pub dims: Vec<usize>,
    pub num_classes: usize,
    pub task: TaskKind,
    /// Dirichlet concentration of the client label distributions.
    pub alpha: f64,
    /// Fraction of every client's samples moved to the dev split.
    pub dev_fraction: f64,
    /// Standard deviation of the class centers.
    pub separation: f32,
    /// Standard deviation of the samples around their center.
    pub noise: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_clients: 20,
            samples_per_client: 50,
            test_samples: 200,
            dims: vec![16, 8],
            num_classes: 4,
            task: TaskKind::SingleLabel,
            alpha: 0.5,
            dev_fraction: 0.2,
            separation: 1.5,
            noise: 1.,
        }
    }
}

/// Where the samples of an experiment come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetConfig {
    Synthetic(SyntheticConfig),
    /// A partition file per fold plus a shared feature file.
    Files {
        partitions: Vec<PathBuf>,
        features: PathBuf,
        dims: Vec<usize>,
        num_classes: usize,
        #[serde(default)]
        task: TaskKind,
    },
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::Synthetic(SyntheticConfig::default())
    }
}

impl DatasetConfig {
    pub fn dims(&self) -> &[usize] {
        match self {
            DatasetConfig::Synthetic(cfg) => &cfg.dims,
            DatasetConfig::Files { dims, .. } => dims,
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            DatasetConfig::Synthetic(cfg) => cfg.num_classes,
            DatasetConfig::Files { num_classes, .. } => *num_classes,
        }
    }

    pub fn task(&self) -> TaskKind {
        match self {
            DatasetConfig::Synthetic(cfg) => cfg.task,
            DatasetConfig::Files { task, .. } => *task,
        }
    }
}

/// Everything needed to run an experiment, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub fed_alg: Algorithm,
    pub learning_rate: f32,
    pub global_learning_rate: f32,
    pub mu: f32,
    pub fedrs_alpha: f32,
    pub sample_rate: f64,
    /// Amount of global rounds.
    pub num_epochs: usize,
    pub local_epochs: usize,
    pub test_frequency: usize,
    pub batch_size: usize,
    pub hidden_size: usize,
    /// Fuse modalities with attention instead of concatenation.
    pub att: bool,
    /// Indices of the dataset modalities the model is trained on, all of
    /// them when absent.
    pub modalities: Option<Vec<usize>>,
    pub folds: usize,
    pub seed: u64,
    pub local_optimizer: OptimizerKind,
    pub server_optimizer: OptimizerKind,
    /// Dev metric used to pick a fold's reported round, derived from the
    /// task when absent.
    pub selection_metric: Option<MetricName>,
    pub parallel_clients: bool,
    pub output_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub simulation: SimulationSetting,
    pub dataset: DatasetConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            fed_alg: Algorithm::FedAvg,
            learning_rate: 0.05,
            global_learning_rate: 0.05,
            mu: 0.001,
            fedrs_alpha: 0.5,
            sample_rate: 0.1,
            num_epochs: 300,
            local_epochs: 1,
            test_frequency: 5,
            batch_size: 64,
            hidden_size: 64,
            att: false,
            modalities: None,
            folds: 5,
            seed: 8,
            local_optimizer: OptimizerKind::GradientDescent,
            server_optimizer: OptimizerKind::Adam,
            selection_metric: None,
            parallel_clients: false,
            output_dir: None,
            simulation: SimulationSetting::default(),
            dataset: DatasetConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Reads a config from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Checks the config for values no experiment can run with.
    ///
    /// # Errors
    /// Returns `ExperimentError::InvalidConfig` naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ExperimentError::InvalidConfig(msg));

        for (what, value) in [
            ("num_epochs", self.num_epochs),
            ("local_epochs", self.local_epochs),
            ("test_frequency", self.test_frequency),
            ("batch_size", self.batch_size),
            ("hidden_size", self.hidden_size),
            ("folds", self.folds),
        ] {
            if value == 0 {
                return invalid(format!("{what} must be greater than 0"));
            }
        }

        for (what, value) in [
            ("learning_rate", self.learning_rate),
            ("global_learning_rate", self.global_learning_rate),
        ] {
            if !(value.is_finite() && value > 0.) {
                return invalid(format!("{what} must be positive, got {value}"));
            }
        }

        if !(self.mu.is_finite() && self.mu >= 0.) {
            return invalid(format!("mu must be non negative, got {}", self.mu));
        }

        if !(0.0..=1.0).contains(&self.fedrs_alpha) {
            return invalid(format!("fedrs_alpha must be in [0, 1], got {}", self.fedrs_alpha));
        }

        if !(self.sample_rate > 0. && self.sample_rate <= 1.) {
            return invalid(format!("sample_rate must be in (0, 1], got {}", self.sample_rate));
        }

        self.simulation
            .validate()
            .map_err(|e| ExperimentError::InvalidConfig(e.to_string()))?;

        let dims = self.dataset.dims();
        if dims.is_empty() || dims.contains(&0) {
            return invalid("every sample needs at least one non empty modality".into());
        }

        if let Some(modalities) = &self.modalities {
            if modalities.is_empty() {
                return invalid("the modality subset can't be empty".into());
            }

            for (i, &m) in modalities.iter().enumerate() {
                if m >= dims.len() {
                    return invalid(format!(
                        "modality {m} out of range for {} modalities",
                        dims.len()
                    ));
                }

                if modalities[..i].contains(&m) {
                    return invalid(format!("modality {m} is selected twice"));
                }
            }
        }

        if self.dataset.num_classes() < 2 {
            return invalid("the label set needs at least 2 classes".into());
        }

        match &self.dataset {
            DatasetConfig::Synthetic(cfg) => {
                if cfg.num_clients == 0 || cfg.samples_per_client == 0 || cfg.test_samples == 0 {
                    return invalid("synthetic clients and splits can't be empty".into());
                }

                if !(cfg.alpha.is_finite() && cfg.alpha > 0.) {
                    return invalid(format!("alpha must be positive, got {}", cfg.alpha));
                }

                if !(0.0..1.0).contains(&cfg.dev_fraction) {
                    return invalid(format!("dev_fraction must be in [0, 1), got {}", cfg.dev_fraction));
                }
            }
            DatasetConfig::Files { partitions, .. } => {
                if partitions.len() < self.folds {
                    return invalid(format!(
                        "{} folds need as many partition files, got {}",
                        self.folds,
                        partitions.len()
                    ));
                }
            }
        }

        Ok(())
    }

    /// Returns the local training hyperparameters.
    pub fn trainer_config(&self) -> Result<TrainerConfig> {
        let non_zero = |what: &str, value: usize| {
            NonZeroUsize::new(value)
                .ok_or_else(|| ExperimentError::InvalidConfig(format!("{what} must be greater than 0")))
        };

        Ok(TrainerConfig {
            local_epochs: non_zero("local_epochs", self.local_epochs)?,
            batch_size: non_zero("batch_size", self.batch_size)?,
            optimizer: self.local_optimizer.spec(self.learning_rate),
        })
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            mu: self.mu,
            fedrs_alpha: self.fedrs_alpha,
        }
    }

    pub fn server_optimizer(&self) -> OptimizerSpec {
        self.server_optimizer.spec(self.global_learning_rate)
    }

    pub fn fusion(&self) -> Fusion {
        if self.att {
            Fusion::Attention
        } else {
            Fusion::Concat
        }
    }

    /// Returns the dataset modalities the model sees, in training order.
    pub fn selected_modalities(&self) -> Vec<usize> {
        match &self.modalities {
            Some(modalities) => modalities.clone(),
            None => (0..self.dataset.dims().len()).collect(),
        }
    }

    /// Names a run for its result directory: the modality subset, if any,
    /// followed by the simulation setting.
    pub fn run_label(&self) -> String {
        let subset = self.modalities.as_ref().map(|modalities| {
            let ids: Vec<String> = modalities.iter().map(usize::to_string).collect();
            format!("mod{}", ids.join("-"))
        });

        subset
            .into_iter()
            .chain(Some(self.simulation.setting_str()))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Returns whether dev and test are evaluated after `round`: every
    /// `test_frequency` rounds starting at the first one, and on the last.
    pub fn evaluates(&self, round: usize) -> bool {
        round.checked_rem(self.test_frequency) == Some(0) || round + 1 == self.num_epochs
    }

    /// Returns the dev metric that selects a fold's reported round.
    pub fn selection_metric(&self) -> MetricName {
        self.selection_metric
            .unwrap_or_else(|| MetricName::default_for(self.dataset.task()))
    }
}
