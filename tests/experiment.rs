use client::Algorithm;
use fed_multimodal::{DatasetConfig, ExperimentConfig, ExperimentError, SyntheticConfig};
use machine_learning::metrics::MetricName;
use ml_core::{Target, TaskKind};
use simulation::{Partition, PartitionEntry, SimulationSetting, DEV, TEST};

fn small(fed_alg: Algorithm) -> ExperimentConfig {
    ExperimentConfig {
        fed_alg,
        learning_rate: 0.05,
        global_learning_rate: 0.05,
        sample_rate: 0.5,
        num_epochs: 4,
        local_epochs: 1,
        test_frequency: 2,
        batch_size: 8,
        hidden_size: 8,
        folds: 2,
        dataset: DatasetConfig::Synthetic(SyntheticConfig {
            num_clients: 6,
            samples_per_client: 20,
            test_samples: 30,
            dims: vec![4, 3],
            num_classes: 3,
            ..SyntheticConfig::default()
        }),
        ..ExperimentConfig::default()
    }
}

#[test]
fn every_algorithm_runs() {
    for alg in [
        Algorithm::FedAvg,
        Algorithm::FedProx,
        Algorithm::FedOpt,
        Algorithm::Scaffold,
        Algorithm::FedRs,
    ] {
        let result = fed_multimodal::run(&small(alg)).unwrap();

        assert_eq!(result.algorithm, alg);
        assert_eq!(result.folds.len(), 2);
        for fold in &result.folds {
            assert!([0, 2, 3].contains(&fold.round));
            assert!(fold.test.loss.is_finite());
        }
        assert!(result.average.contains_key(&MetricName::Acc));
        assert!(result.average.contains_key(&MetricName::Uar));
    }
}

#[test]
fn runs_are_reproducible() {
    let config = ExperimentConfig {
        simulation: SimulationSetting {
            missing_modality_rate: Some(0.3),
            missing_label_rate: Some(0.2),
            label_noise_level: Some(0.1),
            eval_missing_modality: false,
        },
        ..small(Algorithm::Scaffold)
    };

    let a = fed_multimodal::run(&config).unwrap();
    let b = fed_multimodal::run(&config).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.setting, "mm0.3_ml0.2_ln0.1");

    let parallel = ExperimentConfig {
        parallel_clients: true,
        ..config
    };
    assert_eq!(fed_multimodal::run(&parallel).unwrap(), a);
}

#[test]
fn round_logs_hold_train_and_evaluation_metrics() {
    let outcome = fed_multimodal::run_fold(&small(Algorithm::FedAvg), 0).unwrap();

    assert_eq!(outcome.fold, 0);
    for round in [0, 2, 3] {
        let record = outcome.rounds.get(round).unwrap();
        assert!(record.dev.is_some());
        assert!(record.test.is_some());
    }

    let skipped = outcome.rounds.get(1).unwrap();
    assert!(skipped.train.is_some());
    assert!(skipped.dev.is_none());
    assert!(skipped.test.is_none());
}

#[test]
fn multi_label_with_attention() {
    let config = ExperimentConfig {
        att: true,
        fed_alg: Algorithm::FedProx,
        folds: 1,
        simulation: SimulationSetting {
            missing_modality_rate: Some(0.5),
            eval_missing_modality: true,
            ..SimulationSetting::default()
        },
        dataset: DatasetConfig::Synthetic(SyntheticConfig {
            num_clients: 4,
            samples_per_client: 15,
            test_samples: 20,
            dims: vec![3, 3],
            num_classes: 4,
            task: TaskKind::MultiLabel,
            ..SyntheticConfig::default()
        }),
        ..small(Algorithm::FedProx)
    };

    let result = fed_multimodal::run(&config).unwrap();

    assert!(result.folds[0].test.macro_f.is_some());
    assert!(result.folds[0].test.uar.is_none());
    assert!(result.average.contains_key(&MetricName::MacroF));
}

#[test]
fn results_are_written_to_the_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        folds: 1,
        output_dir: Some(dir.path().to_path_buf()),
        ..small(Algorithm::FedAvg)
    };

    fed_multimodal::run(&config).unwrap();

    let base = dir.path().join("fed_avg").join("clean");
    assert!(base.join("result.json").is_file());
    assert!(base.join("fold0.json").is_file());
    assert!(base.join("simulation_fold0.json").is_file());

    let raw = std::fs::read_to_string(base.join("result.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["folds"].as_array().unwrap().len(), 1);
}

#[test]
fn unimodal_runs_on_the_selected_modality() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        folds: 1,
        modalities: Some(vec![1]),
        simulation: SimulationSetting {
            missing_label_rate: Some(0.2),
            ..SimulationSetting::default()
        },
        output_dir: Some(dir.path().to_path_buf()),
        ..small(Algorithm::FedAvg)
    };

    let result = fed_multimodal::run(&config).unwrap();

    assert_eq!(result.setting, "mod1_ml0.2");
    assert!(result.folds[0].test.loss.is_finite());
    assert!(dir.path().join("fed_avg").join("mod1_ml0.2").join("result.json").is_file());

    let multimodal = fed_multimodal::run(&ExperimentConfig {
        modalities: None,
        output_dir: None,
        ..config
    })
    .unwrap();
    assert_ne!(multimodal.folds, result.folds);
}

fn write_files(dir: &std::path::Path, with_dev: bool) -> DatasetConfig {
    let mut partition = Partition::new();
    let mut features = serde_json::Map::new();

    let mut entries = |prefix: &str, n: usize| {
        (0..n)
            .map(|i| {
                let key = format!("{prefix}-{i}");
                let class = i % 2;
                let value = if class == 0 { -1. } else { 1. };
                features.insert(key.clone(), serde_json::json!([[value, value], [value]]));
                PartitionEntry::new(key, Target::Class(class))
            })
            .collect::<Vec<_>>()
    };

    let a = entries("a", 10);
    let b = entries("b", 12);
    let dev = entries("dev", 6);
    let test = entries("test", 6);

    partition.insert("a", a).unwrap();
    partition.insert("b", b).unwrap();
    partition.insert("empty", vec![]).unwrap();
    if with_dev {
        partition.insert(DEV, dev).unwrap();
    }
    partition.insert(TEST, test).unwrap();

    let partition_path = dir.join("fold0.json");
    let features_path = dir.join("features.json");
    partition.to_json_file(&partition_path).unwrap();
    std::fs::write(&features_path, serde_json::Value::Object(features).to_string()).unwrap();

    DatasetConfig::Files {
        partitions: vec![partition_path],
        features: features_path,
        dims: vec![2, 1],
        num_classes: 2,
        task: TaskKind::SingleLabel,
    }
}

#[test]
fn file_datasets_skip_empty_clients() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        folds: 1,
        sample_rate: 1.,
        dataset: write_files(dir.path(), true),
        ..small(Algorithm::FedAvg)
    };

    let outcome = fed_multimodal::run_fold(&config, 0).unwrap();

    let record = outcome.rounds.get(0).unwrap();
    assert!(record.train.is_some());
    assert_eq!(record.skipped.len(), 1);
    assert_eq!(record.skipped[0].client_id, "empty");
}

#[test]
fn missing_dev_split_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExperimentConfig {
        folds: 1,
        dataset: write_files(dir.path(), false),
        ..small(Algorithm::FedAvg)
    };

    assert!(matches!(
        fed_multimodal::run(&config),
        Err(ExperimentError::MissingSplit("dev"))
    ));
}
