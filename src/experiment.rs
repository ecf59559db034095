use client::{ClientContext, ClientTrainer, ClientUpdate, Strategy, TrainerConfig};
use log::{debug, info, warn};
use machine_learning::{
    arch::{loss::Loss, MultimodalClassifier},
    dataset::Dataset,
};
use rayon::prelude::*;
use server::{Selection, ServerCoordinator, SkipReason, Split};
use simulation::{
    seed::{derive_seed, seeded_rng, stream},
    Partition, SimulationDict, SimulationManager, DEV, TEST,
};

use crate::{
    config::ExperimentConfig,
    data::{build_dataset, load_fold, DataShape, FeatureStore},
    error::{ExperimentError, Result},
    results::{result_dir, write_json, ExperimentResult, FoldOutcome},
};

/// A training client of a fold, ready to be sampled.
enum ClientData {
    Ready {
        id: String,
        dataset: Dataset,
        class_counts: Vec<usize>,
    },
    Skipped {
        id: String,
        reason: SkipReason,
    },
}

/// One sampled client's local training of a round.
struct Job {
    idx: usize,
    id: String,
    dataset: Dataset,
    strategy: Strategy,
}

/// What every client of a round shares.
struct RoundContext<'a> {
    model: &'a MultimodalClassifier,
    loss: Loss,
    trainer: TrainerConfig,
    global: &'a [f32],
    seed: u64,
    fold: usize,
    round: usize,
}

impl RoundContext<'_> {
    fn train(&self, job: Job) -> Result<ClientUpdate> {
        let Job {
            idx,
            id,
            mut dataset,
            mut strategy,
        } = job;

        let rng = seeded_rng(&[
            self.seed,
            self.fold as u64,
            self.round as u64,
            idx as u64,
            stream::TRAINING,
        ]);
        let mut trainer = ClientTrainer::new(self.model.clone(), self.loss, self.trainer, rng);

        let update = trainer.train(&id, self.round, self.global, &mut dataset, &mut strategy)?;
        debug!(
            client_id = id.as_str(), round = self.round, strategy = strategy.kind(),
            loss = update.metrics().loss;
            "client trained"
        );

        Ok(update)
    }
}

/// Runs every fold of an experiment and averages their results.
///
/// When `output_dir` is set, every fold's history and simulation masks and
/// the final result are written under `<output_dir>/<algorithm>/<run label>`.
///
/// # Errors
/// Returns an `ExperimentError` if the config is invalid or any fold fails.
pub fn run(config: &ExperimentConfig) -> Result<ExperimentResult> {
    config.validate()?;

    let setting = config.run_label();
    info!(
        algorithm = config.fed_alg.as_str(), setting = setting.as_str(), folds = config.folds;
        "starting experiment"
    );

    let mut folds = Vec::with_capacity(config.folds);
    for fold in 0..config.folds {
        let outcome = run_fold(config, fold)?;

        if let Some(dir) = &config.output_dir {
            let path = result_dir(dir, config.fed_alg, &setting).join(format!("fold{fold}.json"));
            write_json(&path, &outcome)?;
        }

        folds.push(outcome.result);
    }

    let result = ExperimentResult::new(config.fed_alg, setting, folds);
    for (metric, value) in &result.average {
        info!(metric = metric.as_str(), value = *value; "average over folds");
    }

    if let Some(dir) = &config.output_dir {
        let path = result_dir(dir, config.fed_alg, &result.setting).join("result.json");
        write_json(&path, &result)?;
    }

    Ok(result)
}

/// Runs the rounds of a single fold.
///
/// # Errors
/// Returns an `ExperimentError` on any fatal condition: invalid data,
/// a missing or empty evaluation split, a non finite loss or an update that
/// doesn't fit the global model.
pub fn run_fold(config: &ExperimentConfig, fold: usize) -> Result<FoldOutcome> {
    let seed = config.seed;
    let all_dims = config.dataset.dims();
    let modalities = config.selected_modalities();
    let dims: Vec<usize> = modalities
        .iter()
        .map(|&m| {
            all_dims.get(m).copied().ok_or_else(|| {
                ExperimentError::InvalidConfig(format!("the dataset has no modality {m}"))
            })
        })
        .collect::<Result<_>>()?;
    let shape = DataShape {
        modalities,
        dims,
        task: config.dataset.task(),
        num_classes: config.dataset.num_classes(),
    };

    let data = load_fold(&config.dataset, seed, fold)?;
    let partition = &data.partition;
    partition.check_labels(shape.num_classes)?;

    // Masks cover every stored modality, whichever subset the model sees.
    let manager = SimulationManager::new(config.simulation, all_dims.len(), shape.num_classes, seed)?;
    let simulation = manager.simulate_partition(partition, fold)?;

    if let Some(dir) = &config.output_dir {
        let dir = result_dir(dir, config.fed_alg, &config.run_label());
        std::fs::create_dir_all(&dir)?;
        simulation.to_json_file(dir.join(format!("simulation_fold{fold}.json")))?;
    }

    let clients = client_data(partition, &simulation, &data.features, &shape)?;
    let dev = eval_split(partition, DEV, &simulation, &data.features, &shape)?;
    let test = eval_split(partition, TEST, &simulation, &data.features, &shape)?;

    let mut model = MultimodalClassifier::new(
        &shape.dims,
        config.hidden_size,
        shape.num_classes,
        config.fusion(),
    )?;
    let initial = model.init_params(&mut seeded_rng(&[seed, fold as u64, stream::INIT]))?;
    let loss = Loss::for_task(shape.task);
    let trainer = config.trainer_config()?;

    let mut server = ServerCoordinator::new(
        config.fed_alg,
        initial,
        clients.len(),
        config.server_optimizer(),
    );
    server.sample_clients(
        config.sample_rate,
        config.num_epochs,
        derive_seed(&[seed, fold as u64, stream::SAMPLING]),
    )?;

    for round in 0..config.num_epochs {
        server.initialize_epoch_updates(round);

        let mut jobs = Vec::new();
        for idx in server.clients_for_round(round)?.to_vec() {
            match &clients[idx] {
                ClientData::Skipped { id, reason } => server.record_skip(id, *reason)?,
                ClientData::Ready {
                    id,
                    dataset,
                    class_counts,
                } => {
                    let ctx = ClientContext {
                        class_counts,
                        controls: server.controls_for(id),
                    };

                    jobs.push(Job {
                        idx,
                        id: id.clone(),
                        dataset: dataset.clone(),
                        strategy: Strategy::select(config.fed_alg, config.strategy_params(), ctx)?,
                    });
                }
            }
        }

        let ctx = RoundContext {
            model: &model,
            loss,
            trainer,
            global: server.global_params(),
            seed,
            fold,
            round,
        };

        let updates: Vec<ClientUpdate> = if config.parallel_clients {
            jobs.into_par_iter()
                .map(|job| ctx.train(job))
                .collect::<Result<_>>()?
        } else {
            jobs.into_iter()
                .map(|job| ctx.train(job))
                .collect::<Result<_>>()?
        };

        for update in updates {
            server.save_train_updates(round, update)?;
        }
        server.average_weights()?;

        if config.evaluates(round) {
            for (split, dataset) in [(Split::Dev, &dev), (Split::Test, &test)] {
                let metrics = server.inference(&mut model, &loss, dataset, split, trainer.batch_size)?;
                server.record_evaluation(round, split, metrics);
            }
        }
    }

    let result = server.summarize(Selection::BestDev(config.selection_metric()))?;
    info!(
        fold = fold, round = result.round,
        test_macro_f = result.test.macro_f.unwrap_or(f32::NAN),
        test_uar = result.test.uar.unwrap_or(f32::NAN),
        test_acc = result.test.acc.unwrap_or(f32::NAN);
        "fold finished"
    );

    Ok(FoldOutcome {
        fold,
        result,
        rounds: server.into_log(),
    })
}

/// Builds the dataset of every training client, in partition order.
///
/// Clients without samples, or referencing samples the store doesn't hold,
/// are kept as skipped so that sampling indices stay aligned.
fn client_data(
    partition: &Partition,
    simulation: &SimulationDict,
    features: &FeatureStore,
    shape: &DataShape,
) -> Result<Vec<ClientData>> {
    partition
        .training_clients()
        .map(|client| {
            let id = client.id.clone();

            if client.entries.is_empty() {
                return Ok(ClientData::Skipped {
                    id,
                    reason: SkipReason::EmptyDataset,
                });
            }

            match build_dataset(&client.entries, simulation.get(&id), features, shape) {
                Ok(dataset) => Ok(ClientData::Ready {
                    id,
                    class_counts: dataset.class_counts(),
                    dataset,
                }),
                Err(ExperimentError::MissingFeatures { key }) => {
                    warn!(client_id = id.as_str(), key = key.as_str(); "client data unavailable");
                    Ok(ClientData::Skipped {
                        id,
                        reason: SkipReason::Unavailable,
                    })
                }
                Err(e) => Err(e),
            }
        })
        .collect()
}

fn eval_split(
    partition: &Partition,
    split: &'static str,
    simulation: &SimulationDict,
    features: &FeatureStore,
    shape: &DataShape,
) -> Result<Dataset> {
    let entries = partition
        .get(split)
        .ok_or(ExperimentError::MissingSplit(split))?;

    build_dataset(entries, simulation.get(split), features, shape)
}
