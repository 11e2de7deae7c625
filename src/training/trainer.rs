use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::backend::{AutodiffBackend, Backend},
};
use crate::{
    data::{LunaDataset, NoduleBatch, NoduleBatcher},
    error::{DetectorError, Result},
    evaluation::{EvalPrediction, MetricResult, MetricsFn},
    model::VitDet3D,
    training::{
        checkpoint::{CheckpointManager, CheckpointState},
        config::TrainingConfig,
        metrics::{EvalRecord, LossAccumulator, TrainLogEntry, TrainingHistory},
    },
};

type Loader<B> = Arc<dyn DataLoader<B, NoduleBatch<B>>>;

/// What a finished run hands back
#[derive(Debug)]
pub struct TrainOutcome<B: Backend> {
    /// Best checkpoint's weights when restoring is enabled, else the last weights
    pub model: VitDet3D<B>,
    pub history: TrainingHistory,
    pub best_step: Option<u64>,
    pub global_step: u64,
}

/// Owns the fit loop: optimisation, periodic evaluation, checkpointing and
/// best-model restoration.
pub struct Trainer<B: AutodiffBackend> {
    model: VitDet3D<B>,
    config: TrainingConfig,
    train_dataset: LunaDataset,
    eval_dataset: LunaDataset,
    collator: NoduleBatcher,
    compute_metrics: MetricsFn,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        model: VitDet3D<B>,
        config: TrainingConfig,
        train_dataset: LunaDataset,
        eval_dataset: LunaDataset,
        collator: NoduleBatcher,
        compute_metrics: MetricsFn,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            config,
            train_dataset,
            eval_dataset,
            collator,
            compute_metrics,
            device,
        }
    }

    /// Runs the full schedule. Blocks until the epoch budget is spent.
    pub fn train(self) -> Result<TrainOutcome<B>> {
        let Self {
            mut model,
            config,
            train_dataset,
            eval_dataset,
            collator,
            compute_metrics,
            device,
        } = self;
        config.validate()?;
        config.save(&config.output_dir)?;

        let train_len = train_dataset.len();
        let eval_len = eval_dataset.len();
        let steps_per_epoch = train_len.div_ceil(config.train_batch_size);
        log::info!("=== Starting Training ===");
        log::info!("Epochs:          {}", config.num_epochs);
        log::info!("Batch size:      {}", config.train_batch_size);
        log::info!("Learning rate:   {}", config.learning_rate);
        log::info!("Train items:     {}", train_len);
        log::info!("Val items:       {}", eval_len);
        log::info!("Steps per epoch: {}", steps_per_epoch);
        log::info!("Total steps:     {}", steps_per_epoch * config.num_epochs);

        let train_loader: Loader<B> = DataLoaderBuilder::new(collator.clone())
            .batch_size(config.train_batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(train_dataset);
        let eval_loader: Loader<B::InnerBackend> = DataLoaderBuilder::new(collator)
            .batch_size(config.eval_batch_size)
            .num_workers(config.num_workers)
            .build(eval_dataset);

        let mut optimizer = AdamWConfig::new()
            .with_weight_decay(config.weight_decay as f32)
            .init();
        let checkpoints = CheckpointManager::new(&config.output_dir, config.save_total_limit);
        let mut history = TrainingHistory::new();
        let mut running = LossAccumulator::new();
        let mut step: u64 = 0;
        let mut last_eval: Option<EvalRecord> = None;

        for epoch in 0..config.num_epochs {
            let epoch_start = Instant::now();
            let mut seen = 0;

            for batch in train_loader.iter() {
                seen += batch.labels.dims()[0];
                let loss = train_step(&mut model, &mut optimizer, batch, &config);
                running.update(loss);
                step += 1;

                if step % config.logging_steps as u64 == 0 {
                    history.push_train(TrainLogEntry { step, epoch, loss: running.take() });
                }

                if step % config.eval_steps as u64 == 0 {
                    let record =
                        run_evaluation(&model, &eval_loader, eval_len, compute_metrics, step, epoch)?;
                    history.push_eval(record.clone());
                    last_eval = Some(record);
                }

                if step % config.save_steps as u64 == 0 {
                    let record = last_eval
                        .clone()
                        .filter(|r| r.step == step)
                        .unwrap_or_else(|| unevaluated(step, epoch));
                    save_and_rotate(&checkpoints, &model, &history, &config, &record, epoch)?;
                    history.save_csv(&config.logging_dir)?;
                }
            }

            if seen != train_len {
                return Err(DetectorError::ShapeMismatch {
                    context: "training samples per epoch",
                    expected: train_len,
                    got: seen,
                });
            }

            log::info!(
                "--- Epoch {} / {} done in {:.1}s (step {}) ---",
                epoch + 1,
                config.num_epochs,
                epoch_start.elapsed().as_secs_f64(),
                step
            );
        }

        // close out a run whose last step fell between evaluations
        if step > 0 && last_eval.as_ref().map(|r| r.step) != Some(step) {
            let epoch = config.num_epochs.saturating_sub(1);
            if !running.is_empty() {
                history.push_train(TrainLogEntry { step, epoch, loss: running.take() });
            }
            let record = run_evaluation(&model, &eval_loader, eval_len, compute_metrics, step, epoch)?;
            history.push_eval(record.clone());
            save_and_rotate(&checkpoints, &model, &history, &config, &record, epoch)?;
        }

        log::info!("=== Training Complete ===");

        let best_step = history
            .best_record(&config.metric_for_best_model, config.greater_is_better)
            .map(|r| r.step);

        if config.load_best_model_at_end {
            match best_step {
                Some(best_step) => {
                    let state = checkpoints.read_state(best_step)?;
                    let value = state
                        .metrics
                        .get(&config.metric_for_best_model)
                        .copied()
                        .flatten()
                        .unwrap_or(f64::NAN);
                    log::info!(
                        "Loading best model from step {} (epoch {}, {} = {:.4})",
                        state.step, state.epoch, config.metric_for_best_model, value
                    );
                    model = checkpoints.load(model, best_step, &device)?;
                }
                None => log::warn!(
                    "No evaluation recorded '{}'; keeping the last weights",
                    config.metric_for_best_model
                ),
            }
        }

        history.save_csv(&config.logging_dir)?;

        Ok(TrainOutcome {
            model,
            history,
            best_step,
            global_step: step,
        })
    }
}

/// One optimisation step; returns the batch loss
fn train_step<B: AutodiffBackend>(
    model: &mut VitDet3D<B>,
    optimizer: &mut impl Optimizer<VitDet3D<B>, B>,
    batch: NoduleBatch<B>,
    config: &TrainingConfig,
) -> f64 {
    let output = model.forward_detection(batch);
    let loss_value = output.loss_value();

    let grads = output.loss.backward();
    let grads = GradientsParams::from_grads(grads, &*model);
    *model = optimizer.step(config.learning_rate, model.clone(), grads);

    loss_value
}

/// Evaluation pass with the non-autodiff model, scored by `compute_metrics`.
/// Fails unless all `expected` samples were seen.
fn run_evaluation<B: AutodiffBackend>(
    model: &VitDet3D<B>,
    loader: &Loader<B::InnerBackend>,
    expected: usize,
    compute_metrics: MetricsFn,
    step: u64,
    epoch: usize,
) -> Result<EvalRecord> {
    let valid_model = model.valid();
    let mut collected = EvalPrediction::default();
    let mut loss = LossAccumulator::new();

    for batch in loader.iter() {
        let groundtruth = batch.label_batch();
        let output = valid_model.forward_detection(batch);
        loss.update(output.loss_value());
        collected.extend(EvalPrediction {
            predictions: output.prediction_batch(),
            groundtruth,
        });
    }

    if collected.is_empty() {
        return Err(DetectorError::EmptyInput("evaluation set yielded no samples"));
    }
    if collected.len() != expected {
        return Err(DetectorError::ShapeMismatch {
            context: "evaluation samples",
            expected,
            got: collected.len(),
        });
    }

    Ok(EvalRecord {
        step,
        epoch,
        eval_loss: loss.avg_loss(),
        metrics: compute_metrics(&collected)?,
    })
}

/// Placeholder record for a save that has no evaluation at the same step
fn unevaluated(step: u64, epoch: usize) -> EvalRecord {
    EvalRecord {
        step,
        epoch,
        eval_loss: f64::NAN,
        metrics: MetricResult::new(),
    }
}

fn save_and_rotate<B: Backend>(
    checkpoints: &CheckpointManager,
    model: &VitDet3D<B>,
    history: &TrainingHistory,
    config: &TrainingConfig,
    record: &EvalRecord,
    epoch: usize,
) -> Result<()> {
    checkpoints.save(model, &CheckpointState::new(record.step, epoch, &record.metrics))?;

    let best = if config.load_best_model_at_end {
        history
            .best_record(&config.metric_for_best_model, config.greater_is_better)
            .map(|r| r.step)
    } else {
        None
    };
    checkpoints.rotate(best)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use burn::backend::{Autodiff, NdArray};

    use crate::data::volume::HU_MAX;
    use crate::evaluation::compute_metrics;
    use crate::model::config::VitDet3DConfig;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn write_subset(root: &Path, subset: usize, samples: usize) {
        let dir = root.join(format!("subset{}", subset));
        fs::create_dir_all(&dir).unwrap();
        let mut entries = Vec::new();
        for i in 0..samples {
            let name = format!("scan{}.raw", i);
            let bytes: Vec<u8> = (0..64usize)
                .flat_map(|v| {
                    let hu = if (v + i) % 3 == 0 { HU_MAX } else { -600.0 };
                    hu.to_le_bytes()
                })
                .collect();
            fs::write(dir.join(&name), bytes).unwrap();
            let nodule = if i % 2 == 0 { "[1, 1, 1, 3, 3, 3]" } else { "null" };
            entries.push(format!(
                r#"{{"volume": "{}", "shape": [4, 4, 4], "nodule": {}}}"#,
                name, nodule
            ));
        }
        fs::write(dir.join("annotations.json"), format!("[{}]", entries.join(","))).unwrap();
    }

    #[test]
    fn test_short_run_saves_rotates_and_restores_best() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_subset(data.path(), 0, 4);
        write_subset(data.path(), 1, 2);

        let device = Default::default();
        let model_config = VitDet3DConfig::new(4, 2)
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16);
        let config = TrainingConfig {
            output_dir: out.path().join("ckpt"),
            num_workers: 1,
            ..TrainingConfig::quick_test(out.path().join("logs"))
        };

        let trainer = Trainer::<TestBackend>::new(
            model_config.init(&device),
            config,
            LunaDataset::new(&[0], data.path(), 4, 2).unwrap(),
            LunaDataset::new(&[1], data.path(), 4, 2).unwrap(),
            NoduleBatcher::new(),
            compute_metrics,
            device,
        );
        let outcome = trainer.train().unwrap();

        // 4 items / batch 2 = 2 steps per epoch, 2 epochs
        assert_eq!(outcome.global_step, 4);
        assert_eq!(outcome.history.evals.len(), 2);
        assert!(outcome.best_step.is_some());

        let saved = CheckpointManager::new(out.path().join("ckpt"), 2).saved_steps().unwrap();
        assert!(saved.len() <= 2);
        assert!(saved.contains(&outcome.best_step.unwrap()));

        assert!(out.path().join("logs/history.csv").exists());
        assert!(out.path().join("ckpt/training_args.json").exists());
    }

    #[test]
    fn test_volume_lost_mid_run_aborts_training() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_subset(data.path(), 0, 4);
        write_subset(data.path(), 1, 2);

        let device = Default::default();
        let model_config = VitDet3DConfig::new(4, 2)
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16);
        let train_dataset = LunaDataset::new(&[0], data.path(), 4, 2).unwrap();
        let eval_dataset = LunaDataset::new(&[1], data.path(), 4, 2).unwrap();
        fs::remove_file(data.path().join("subset0/scan1.raw")).unwrap();

        let trainer = Trainer::<TestBackend>::new(
            model_config.init(&device),
            TrainingConfig {
                output_dir: out.path().join("ckpt"),
                ..TrainingConfig::quick_test(out.path().join("logs"))
            },
            train_dataset,
            eval_dataset,
            NoduleBatcher::new(),
            compute_metrics,
            device,
        );
        assert!(matches!(
            trainer.train(),
            Err(DetectorError::ShapeMismatch { expected: 4, .. })
        ));
    }

    #[test]
    fn test_short_evaluation_pass_is_rejected() {
        let data = tempfile::tempdir().unwrap();
        write_subset(data.path(), 1, 3);
        let eval_dataset = LunaDataset::new(&[1], data.path(), 4, 2).unwrap();
        fs::remove_file(data.path().join("subset1/scan2.raw")).unwrap();

        let device = Default::default();
        let model = VitDet3DConfig::new(4, 2)
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .init::<TestBackend>(&device);
        let loader: Loader<<TestBackend as AutodiffBackend>::InnerBackend> =
            DataLoaderBuilder::new(NoduleBatcher::new())
                .batch_size(1)
                .build(eval_dataset);

        assert!(matches!(
            run_evaluation(&model, &loader, 3, compute_metrics, 1, 0),
            Err(DetectorError::ShapeMismatch { context: "evaluation samples", expected: 3, .. })
        ));
    }
}
