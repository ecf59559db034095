use std::num::NonZeroUsize;

use client::{Algorithm, ClientUpdate, ControlUpdate};
use machine_learning::{
    arch::{Fusion, MultimodalClassifier, loss::CrossEntropy},
    dataset::{Dataset, Sample},
    metrics::Metrics,
    optimization::OptimizerSpec,
};
use ml_core::{Target, TaskKind};
use rand::{SeedableRng, rngs::StdRng};
use server::{Selection, ServerCoordinator, ServerErr, SkipReason, Split};

fn adam() -> OptimizerSpec {
    OptimizerSpec::Adam {
        learning_rate: 0.05,
        beta1: 0.9,
        beta2: 0.999,
        epsilon: 1e-8,
    }
}

fn metrics(samples: usize, loss: f32, acc: f32) -> Metrics {
    Metrics {
        loss,
        samples,
        acc: Some(acc),
        ..Metrics::default()
    }
}

fn update(id: &str, n: usize, params: Vec<f32>) -> ClientUpdate {
    ClientUpdate::new(id, params, n, metrics(n, 1., 0.5), None)
}

#[test]
fn weighted_average_of_two_clients() {
    let mut server = ServerCoordinator::new(Algorithm::FedAvg, vec![0., 0.], 2, adam());

    server.initialize_epoch_updates(0);
    server.save_train_updates(0, update("a", 10, vec![1., 1.])).unwrap();
    server.save_train_updates(0, update("b", 30, vec![3., 3.])).unwrap();

    let train = server.average_weights().unwrap().unwrap();

    assert_eq!(server.global_params(), [2.5, 2.5]);
    assert_eq!(train.samples, 40);
    assert_eq!(server.log().get(0).unwrap().train, Some(train));
}

#[test]
fn empty_round_is_a_no_op() {
    let mut server = ServerCoordinator::new(Algorithm::Scaffold, vec![0.25, -1.5, 3.], 4, adam());
    let before = server.state().clone();

    server.initialize_epoch_updates(3);
    server.record_skip("2", SkipReason::EmptyDataset).unwrap();

    assert_eq!(server.average_weights().unwrap(), None);
    assert_eq!(server.state(), &before);

    let record = server.log().get(3).unwrap();
    assert_eq!(record.train, None);
    assert_eq!(record.skipped.len(), 1);
    assert_eq!(record.skipped[0].client_id, "2");
}

#[test]
fn scaffold_controls_are_averaged_over_the_population() {
    let mut server = ServerCoordinator::new(Algorithm::Scaffold, vec![0., 0.], 10, adam());

    let controls = server.controls_for("4").unwrap();
    assert_eq!(controls.server, [0., 0.]);
    assert_eq!(controls.client, [0., 0.]);

    server.initialize_epoch_updates(0);
    for (id, delta) in [("4", vec![1., 2.]), ("7", vec![3., 4.])] {
        let control = ControlUpdate::new(delta.clone(), delta);
        let update = ClientUpdate::new(id, vec![1., 1.], 5, metrics(5, 1., 0.5), Some(control));
        server.save_train_updates(0, update).unwrap();
    }
    server.average_weights().unwrap();

    let server_control = server.state().server_control().unwrap();
    assert!((server_control[0] - 0.4).abs() < 1e-6);
    assert!((server_control[1] - 0.6).abs() < 1e-6);

    assert_eq!(server.state().client_control("7").unwrap(), [3., 4.]);
    assert_eq!(server.controls_for("7").unwrap().client, [3., 4.]);
    assert!(server.state().client_control("1").is_none());
}

#[test]
fn scaffold_requires_a_control_update() {
    let mut server = ServerCoordinator::new(Algorithm::Scaffold, vec![0.], 2, adam());
    server.initialize_epoch_updates(0);

    let err = server.save_train_updates(0, update("0", 1, vec![1.])).unwrap_err();
    assert!(matches!(err, ServerErr::MissingControl { round: 0, .. }));
}

#[test]
fn length_mismatch_names_client_and_round() {
    let mut server = ServerCoordinator::new(Algorithm::FedAvg, vec![0., 0.], 2, adam());
    server.initialize_epoch_updates(5);

    let err = server.save_train_updates(5, update("c9", 3, vec![1.])).unwrap_err();
    match err {
        ServerErr::ShapeMismatch {
            client_id,
            round,
            got,
            expected,
        } => {
            assert_eq!(client_id, "c9");
            assert_eq!((round, got, expected), (5, 1, 2));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn updates_need_an_open_round() {
    let mut server = ServerCoordinator::new(Algorithm::FedAvg, vec![0.], 2, adam());

    assert!(matches!(
        server.save_train_updates(0, update("a", 1, vec![1.])),
        Err(ServerErr::RoundNotInitialized)
    ));

    server.initialize_epoch_updates(1);
    assert!(matches!(
        server.save_train_updates(2, update("a", 1, vec![1.])),
        Err(ServerErr::RoundMismatch { expected: 1, got: 2 })
    ));

    server.save_train_updates(1, update("a", 1, vec![1.])).unwrap();
    assert!(matches!(
        server.save_train_updates(1, update("a", 1, vec![1.])),
        Err(ServerErr::DuplicateUpdate { .. })
    ));

    server.average_weights().unwrap();
    assert!(matches!(server.average_weights(), Err(ServerErr::RoundNotInitialized)));
}

#[test]
fn fed_opt_steps_towards_the_average() {
    let sgd = OptimizerSpec::GradientDescent { learning_rate: 0.5 };
    let mut server = ServerCoordinator::new(Algorithm::FedOpt, vec![2., 2.], 1, sgd);

    server.initialize_epoch_updates(0);
    server.save_train_updates(0, update("0", 4, vec![0., 4.])).unwrap();
    server.average_weights().unwrap();

    assert!((server.global_params()[0] - 1.).abs() < 1e-6);
    assert!((server.global_params()[1] - 3.).abs() < 1e-6);
}

#[test]
fn schedule_is_reproducible() {
    let mut a = ServerCoordinator::new(Algorithm::FedAvg, vec![0.], 20, adam());
    let mut b = ServerCoordinator::new(Algorithm::FedAvg, vec![0.], 20, adam());

    assert!(matches!(a.clients_for_round(0), Err(ServerErr::NoSchedule)));

    let schedule = a.sample_clients(0.1, 5, 8).unwrap().clone();
    assert_eq!(&schedule, b.sample_clients(0.1, 5, 8).unwrap());
    assert_eq!(a.clients_for_round(4).unwrap().len(), 2);
}

#[test]
fn inference_and_summary() {
    let dims = [2, 1];
    let mut model = MultimodalClassifier::new(&dims, 4, 2, Fusion::Concat).unwrap();
    let params = model.init_params(&mut StdRng::seed_from_u64(42)).unwrap();
    let server = ServerCoordinator::new(Algorithm::FedAvg, params, 1, adam());
    let batch_size = NonZeroUsize::new(3).unwrap();

    let samples = (0..5)
        .map(|i| Sample::new(vec![vec![i as f32, 1.], vec![0.5]], Target::Class(i % 2), true))
        .collect();
    let dev = Dataset::new(samples, dims.to_vec(), TaskKind::SingleLabel, 2).unwrap();

    let metrics = server
        .inference(&mut model, &CrossEntropy, &dev, Split::Dev, batch_size)
        .unwrap();
    assert_eq!(metrics.samples, 5);
    assert!(metrics.acc.is_some());
    assert!(metrics.loss.is_finite());

    let empty = Dataset::new(vec![], dims.to_vec(), TaskKind::SingleLabel, 2).unwrap();
    assert!(matches!(
        server.inference(&mut model, &CrossEntropy, &empty, Split::Test, batch_size),
        Err(ServerErr::EmptyEvaluation(Split::Test))
    ));

    let mut server = server;
    server.record_evaluation(4, Split::Dev, metrics);
    server.record_evaluation(4, Split::Test, metrics);

    let result = server.summarize(Selection::Last).unwrap();
    assert_eq!(result.round, 4);
    assert_eq!(result.test, metrics);
}
