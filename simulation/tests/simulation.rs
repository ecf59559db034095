use ml_core::Target;
use simulation::{Partition, PartitionEntry, SimulationManager, SimulationSetting, DEV, TEST};

const MODALITIES: usize = 2;
const CLASSES: usize = 5;

fn entries(n: usize) -> Vec<PartitionEntry> {
    (0..n)
        .map(|i| PartitionEntry::new(format!("k{i}"), Target::Class(i % CLASSES)))
        .collect()
}

fn manager(setting: SimulationSetting) -> SimulationManager {
    SimulationManager::new(setting, MODALITIES, CLASSES, 8).unwrap()
}

#[test]
fn identical_seeds_give_identical_masks() {
    let setting = SimulationSetting {
        missing_modality_rate: Some(0.5),
        missing_label_rate: Some(0.5),
        label_noise_level: Some(0.2),
        eval_missing_modality: false,
    };
    let entries = entries(300);

    let a = manager(setting).simulate_client(&entries, 1, 3).unwrap();
    let b = manager(setting).simulate_client(&entries, 1, 3).unwrap();
    assert_eq!(a, b);

    let other_client = manager(setting).simulate_client(&entries, 1, 4).unwrap();
    let other_fold = manager(setting).simulate_client(&entries, 2, 3).unwrap();
    assert_ne!(a, other_client);
    assert_ne!(a, other_fold);
}

#[test]
fn missing_label_rate_is_respected() {
    let manager = manager(SimulationSetting {
        missing_label_rate: Some(0.3),
        ..SimulationSetting::default()
    });

    let mask = manager.simulate_client(&entries(1000), 1, 0).unwrap();
    let fraction = mask.missing_label_count() as f64 / 1000.;

    assert!((0.25..=0.35).contains(&fraction), "masked fraction {fraction}");
    assert_eq!(mask.missing_modality_count(), 0);
    assert!(mask.corrupted_labels().is_empty());
}

#[test]
fn missing_modality_drops_exactly_one() {
    let manager = manager(SimulationSetting {
        missing_modality_rate: Some(1.0),
        ..SimulationSetting::default()
    });

    let mask = manager.simulate_client(&entries(50), 1, 0).unwrap();

    for i in 0..50 {
        let absent = mask.modalities(i).iter().filter(|p| !**p).count();
        assert_eq!(absent, 1);
    }
}

#[test]
fn full_noise_changes_every_label() {
    let manager = manager(SimulationSetting {
        label_noise_level: Some(1.0),
        ..SimulationSetting::default()
    });
    let entries = entries(200);

    let mask = manager.simulate_client(&entries, 1, 0).unwrap();

    for (i, entry) in entries.iter().enumerate() {
        let noisy = mask.label_for(i, &entry.label);
        assert_ne!(noisy, &entry.label);
        assert!(matches!(noisy, Target::Class(c) if *c < CLASSES));
    }
}

#[test]
fn zero_noise_changes_nothing() {
    let manager = manager(SimulationSetting {
        label_noise_level: Some(0.0),
        ..SimulationSetting::default()
    });

    let mask = manager.simulate_client(&entries(200), 1, 0).unwrap();
    assert!(mask.corrupted_labels().is_empty());
}

#[test]
fn perturbations_are_independent() {
    let modality_only = manager(SimulationSetting {
        missing_modality_rate: Some(0.4),
        ..SimulationSetting::default()
    });
    let everything = manager(SimulationSetting {
        missing_modality_rate: Some(0.4),
        missing_label_rate: Some(0.4),
        label_noise_level: Some(0.4),
        eval_missing_modality: false,
    });
    let entries = entries(100);

    let a = modality_only.simulate_client(&entries, 2, 1).unwrap();
    let b = everything.simulate_client(&entries, 2, 1).unwrap();

    for i in 0..entries.len() {
        assert_eq!(a.modalities(i), b.modalities(i));
    }
}

#[test]
fn partition_simulation_skips_eval_labels() {
    let mut partition = Partition::new();
    partition.insert("0", entries(20)).unwrap();
    partition.insert("1", entries(20)).unwrap();
    partition.insert(DEV, entries(10)).unwrap();
    partition.insert(TEST, entries(10)).unwrap();

    let manager = manager(SimulationSetting {
        missing_label_rate: Some(1.0),
        label_noise_level: Some(1.0),
        ..SimulationSetting::default()
    });
    let dict = manager.simulate_partition(&partition, 1).unwrap();

    assert_eq!(dict.len(), 4);
    assert_eq!(dict.get("0").unwrap().missing_label_count(), 20);
    for split in [DEV, TEST] {
        let mask = dict.get(split).unwrap();
        assert_eq!(mask.missing_label_count(), 0);
        assert!(mask.corrupted_labels().is_empty());
    }

    // client order decides the seed, client "1" is index 1
    let direct = manager.simulate_client(partition.get("1").unwrap(), 1, 1).unwrap();
    assert_eq!(dict.get("1"), Some(&direct));
}
