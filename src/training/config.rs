use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{DetectorError, Result};

/// All hyperparameters for one training run in one place.
/// Built once before the run and only ever borrowed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingConfig {
    /// Checkpoints and saved arguments go here
    pub output_dir: PathBuf,
    /// Loss and evaluation history go here
    pub logging_dir: PathBuf,
    /// Learning rate for the optimizer
    pub learning_rate: f64,
    /// Decoupled weight decay for AdamW
    pub weight_decay: f64,
    pub train_batch_size: usize,
    pub eval_batch_size: usize,
    /// Number of full passes through the training data
    pub num_epochs: usize,
    /// Log the running training loss every N steps
    pub logging_steps: usize,
    /// Run an evaluation pass every N steps
    pub eval_steps: usize,
    /// Save a checkpoint every N steps
    pub save_steps: usize,
    /// Keep at most this many checkpoints on disk (0 keeps all)
    pub save_total_limit: usize,
    /// Reload the best checkpoint once training finishes
    pub load_best_model_at_end: bool,
    /// Metric name used to rank checkpoints
    pub metric_for_best_model: String,
    pub greater_is_better: bool,
    /// Batch fields treated as targets rather than model inputs
    pub label_names: Vec<String>,
    /// Seed for data loader shuffling
    pub seed: u64,
    pub num_workers: usize,
}

impl TrainingConfig {
    /// The LUNA16 run: evaluate and checkpoint every 500 steps, keep 5, restore the best by F1
    pub fn luna16(logging_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: PathBuf::from("luna-train"),
            logging_dir: logging_dir.into(),
            learning_rate: 2e-5,
            weight_decay: 0.01,
            train_batch_size: 10,
            eval_batch_size: 10,
            num_epochs: 300,
            logging_steps: 25,
            eval_steps: 500,
            save_steps: 500,
            save_total_limit: 5,
            load_best_model_at_end: true,
            metric_for_best_model: "f1".to_string(),
            greater_is_better: true,
            label_names: vec!["labels".to_string(), "bbox".to_string()],
            seed: 42,
            num_workers: 1,
        }
    }

    /// Tiny cadence for smoke runs
    pub fn quick_test(logging_dir: impl Into<PathBuf>) -> Self {
        Self {
            num_epochs: 2,
            train_batch_size: 2,
            eval_batch_size: 2,
            learning_rate: 1e-3,
            logging_steps: 1,
            eval_steps: 2,
            save_steps: 2,
            save_total_limit: 2,
            ..Self::luna16(logging_dir)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(DetectorError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.learning_rate <= 0.0 {
            return invalid("learning_rate must be positive");
        }
        if self.train_batch_size == 0 || self.eval_batch_size == 0 {
            return invalid("batch sizes must be positive");
        }
        if self.logging_steps == 0 || self.eval_steps == 0 || self.save_steps == 0 {
            return invalid("logging_steps, eval_steps and save_steps must be positive");
        }
        if self.load_best_model_at_end && self.save_steps % self.eval_steps != 0 {
            return invalid("save_steps must be a multiple of eval_steps to restore the best model");
        }
        if self.metric_for_best_model.is_empty() {
            return invalid("metric_for_best_model must be set");
        }
        Ok(())
    }

    /// Writes the arguments as JSON next to the checkpoints
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let path = dir.join("training_args.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Training arguments written to {}", path.display());
        Ok(())
    }
}
