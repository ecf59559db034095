use log::info;
use ml_core::{Target, TaskKind};
use rand::{rngs::StdRng, Rng};
use rand_distr::{Distribution, Normal};
use simulation::{
    assemble_partition,
    seed::{derive_seed, seeded_rng, stream},
    DirichletPartitioner, PartitionEntry,
};

use crate::{
    config::SyntheticConfig,
    data::{FeatureStore, FoldData},
    error::{ExperimentError, Result},
};

/// Generates the partition and features of a synthetic fold.
///
/// Every class owns a gaussian center per modality; a sample sits around the
/// sum of the centers of its classes. Training samples are spread over the
/// clients with a Dirichlet partition, dev is carved out of every client.
///
/// # Errors
/// Returns an `ExperimentError` if a distribution or the partitioner can't be
/// built from `cfg`.
pub fn generate(cfg: &SyntheticConfig, seed: u64, fold: usize) -> Result<FoldData> {
    let fold = fold as u64;
    let mut rng = seeded_rng(&[seed, fold, stream::SYNTHETIC]);

    let normal = |std_dev: f32| {
        Normal::new(0., std_dev).map_err(|e| ExperimentError::InvalidConfig(e.to_string()))
    };
    let center = normal(cfg.separation)?;
    let noise = normal(cfg.noise)?;

    let centers: Vec<Vec<Vec<f32>>> = (0..cfg.num_classes)
        .map(|_| {
            cfg.dims
                .iter()
                .map(|&dim| center.sample_iter(&mut rng).take(dim).collect())
                .collect()
        })
        .collect();

    let mut features = FeatureStore::new();
    let mut draw = |key: String, rng: &mut StdRng| {
        let label = random_target(cfg.task, cfg.num_classes, rng);
        features.insert(key.clone(), sample_features(&centers, &label, &noise, rng));
        PartitionEntry::new(key, label)
    };

    let pool: Vec<PartitionEntry> = (0..cfg.num_clients * cfg.samples_per_client)
        .map(|k| draw(format!("train-{k}"), &mut rng))
        .collect();
    let test: Vec<PartitionEntry> = (0..cfg.test_samples)
        .map(|k| draw(format!("test-{k}"), &mut rng))
        .collect();

    let partitioner = DirichletPartitioner::new(
        cfg.num_clients,
        cfg.alpha,
        derive_seed(&[seed, fold, stream::PARTITION]),
    )?;
    let shards = partitioner.partition(&pool)?;
    let partition = assemble_partition(shards, cfg.dev_fraction, test)?;

    info!(
        fold = fold, clients = cfg.num_clients, samples = features.len();
        "generated synthetic fold"
    );

    Ok(FoldData {
        partition,
        features,
    })
}

fn random_target<R: Rng + ?Sized>(task: TaskKind, num_classes: usize, rng: &mut R) -> Target {
    let primary = rng.random_range(0..num_classes);

    match task {
        TaskKind::SingleLabel => Target::Class(primary),
        TaskKind::MultiLabel => {
            let p = 1. / num_classes as f64;
            let classes = (0..num_classes)
                .filter(|&c| c == primary || rng.random_bool(p))
                .collect();
            Target::MultiLabel(classes)
        }
    }
}

fn sample_features<R: Rng + ?Sized>(
    centers: &[Vec<Vec<f32>>],
    label: &Target,
    noise: &Normal<f32>,
    rng: &mut R,
) -> Vec<Vec<f32>> {
    let classes = match label {
        Target::Class(class) => std::slice::from_ref(class),
        Target::MultiLabel(classes) => classes.as_slice(),
    };

    let modalities = centers.first().map_or(0, Vec::len);

    (0..modalities)
        .map(|m| {
            let mut values = vec![0.; centers[0][m].len()];
            for &class in classes {
                for (v, c) in values.iter_mut().zip(&centers[class][m]) {
                    *v += c;
                }
            }

            values.iter_mut().for_each(|v| *v += noise.sample(rng));
            values
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureSource;

    fn config() -> SyntheticConfig {
        SyntheticConfig {
            num_clients: 4,
            samples_per_client: 10,
            test_samples: 12,
            dims: vec![3, 2],
            num_classes: 3,
            ..SyntheticConfig::default()
        }
    }

    #[test]
    fn every_sample_has_features() {
        let data = generate(&config(), 8, 0).unwrap();
        let partition = &data.partition;

        assert_eq!(partition.num_training_clients(), 4);
        assert_eq!(partition.test().unwrap().len(), 12);

        let train: usize = partition.training_clients().map(|c| c.entries.len()).sum();
        assert_eq!(train + partition.dev().unwrap().len(), 40);
        assert_eq!(data.features.len(), 52);

        for client in partition.training_clients() {
            for entry in &client.entries {
                let features = data.features.features(&entry.key).unwrap();
                assert_eq!(features.len(), 2);
                assert_eq!(features[0].len(), 3);
                assert_eq!(features[1].len(), 2);
            }
        }
    }

    #[test]
    fn folds_are_reproducible_and_distinct() {
        let a = generate(&config(), 8, 1).unwrap();
        let b = generate(&config(), 8, 1).unwrap();
        let c = generate(&config(), 8, 2).unwrap();

        assert_eq!(a.partition, b.partition);
        assert_eq!(a.features, b.features);
        assert_ne!(a.features, c.features);
    }

    #[test]
    fn multi_label_targets_hold_their_primary_class() {
        let cfg = SyntheticConfig {
            task: TaskKind::MultiLabel,
            ..config()
        };
        let data = generate(&cfg, 3, 0).unwrap();

        for entry in data.partition.test().unwrap() {
            let Target::MultiLabel(classes) = &entry.label else {
                panic!("expected a multi-label target");
            };
            assert!(!classes.is_empty());
            assert!(classes.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
