mod data;
mod error;
mod evaluation;
mod model;
mod training;

use std::path::PathBuf;

use burn::backend::{Autodiff, NdArray};
use training::train;

type TrainBackend = Autodiff<NdArray<f32>>;

const DEFAULT_DATA_DIR: &str = "datasets/luna16";
const DEFAULT_LOG_DIR: &str = "logs";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let data_dir = PathBuf::from(args.get(1).map(|s| s.as_str()).unwrap_or(DEFAULT_DATA_DIR));
    let log_dir = PathBuf::from(args.get(2).map(|s| s.as_str()).unwrap_or(DEFAULT_LOG_DIR));

    log::info!("=== LUNA16 Nodule Detection ===");
    log::info!("Data: {} | Logs: {}", data_dir.display(), log_dir.display());

    let device = Default::default();
    match train::<TrainBackend>(&data_dir, &log_dir, device) {
        Ok(outcome) => {
            match outcome.best_step {
                Some(step) => log::info!("Best checkpoint: step {}", step),
                None => log::info!("No best checkpoint recorded"),
            }
            log::info!(
                "Training complete after {} steps and {} evaluations. History saved to {}",
                outcome.global_step,
                outcome.history.evals.len(),
                log_dir.join("history.csv").display()
            );
        }
        Err(e) => {
            log::error!("Training failed: {}", e);
            std::process::exit(1);
        }
    }
}
