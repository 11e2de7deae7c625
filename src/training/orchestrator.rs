use std::path::Path;

use burn::tensor::backend::AutodiffBackend;

use crate::{
    data::{split, LunaDataset, NoduleBatcher, LUNA16_SUBSETS, VALIDATION_SUBSET},
    error::Result,
    evaluation::compute_metrics,
    model::load_model_config,
    training::{
        config::TrainingConfig,
        trainer::{TrainOutcome, Trainer},
    },
};

/// Model configuration read at startup, relative to the working directory
pub const MODEL_CONFIG_PATH: &str = "model_config.json";

/// Main training entry point: the LUNA16 schedule over `data_dir`, logging to `log_dir`
pub fn train<B: AutodiffBackend>(
    data_dir: &Path,
    log_dir: &Path,
    device: B::Device,
) -> Result<TrainOutcome<B>> {
    run_session(
        Path::new(MODEL_CONFIG_PATH),
        data_dir,
        TrainingConfig::luna16(log_dir),
        device,
    )
}

/// Builds datasets and model, then hands everything to the trainer
pub fn run_session<B: AutodiffBackend>(
    model_config_path: &Path,
    data_dir: &Path,
    args: TrainingConfig,
    device: B::Device,
) -> Result<TrainOutcome<B>> {
    let config = load_model_config(model_config_path)?;
    log::info!("{:?}", config);

    let (train_split, valid_split) = split(LUNA16_SUBSETS, &[VALIDATION_SUBSET]);
    log::info!("Train subsets: {:?} | Val subsets: {:?}", train_split, valid_split);

    log::info!("preparing datasets");
    let train_dataset =
        LunaDataset::new(&train_split, data_dir, config.image_size, config.patch_size)?;
    let valid_dataset =
        LunaDataset::new(&valid_split, data_dir, config.image_size, config.patch_size)?;

    log::info!("preparing model");
    let model = config.init::<B>(&device);
    log::info!(
        "VitDet3D: {} layers, {} patches of {}³ voxels, ~{} parameters",
        model.num_layers(),
        config.num_patches(),
        config.patch_size,
        config.count_parameters()
    );

    args.validate()?;
    log::info!("{:?}", args);

    let trainer = Trainer::new(
        model,
        args,
        train_dataset,
        valid_dataset,
        NoduleBatcher::new(),
        compute_metrics,
        device,
    );
    log::info!("commence training");
    trainer.train()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use burn::backend::{Autodiff, NdArray};
    use burn::config::Config;

    use crate::error::DetectorError;
    use crate::model::config::VitDet3DConfig;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn write_luna_tree(root: &Path) {
        for subset in 0..LUNA16_SUBSETS {
            let dir = root.join(format!("subset{}", subset));
            fs::create_dir_all(&dir).unwrap();
            let bytes: Vec<u8> = (0..64).flat_map(|_| (-500.0f32).to_le_bytes()).collect();
            fs::write(dir.join("scan.raw"), bytes).unwrap();
            let nodule = if subset % 2 == 0 { "[0, 0, 0, 2, 2, 2]" } else { "null" };
            fs::write(
                dir.join("annotations.json"),
                format!(r#"[{{"volume": "scan.raw", "shape": [4, 4, 4], "nodule": {}}}]"#, nodule),
            )
            .unwrap();
        }
    }

    fn tiny_model_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("model_config.json");
        VitDet3DConfig::new(4, 2)
            .with_hidden_size(8)
            .with_num_hidden_layers(1)
            .with_num_attention_heads(2)
            .with_intermediate_size(16)
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_session_trains_on_nine_subsets() {
        let data = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_luna_tree(data.path());

        let args = TrainingConfig {
            output_dir: work.path().join("luna-train"),
            num_epochs: 1,
            train_batch_size: 3,
            eval_batch_size: 3,
            ..TrainingConfig::quick_test(work.path().join("logs"))
        };
        let outcome = run_session::<TestBackend>(
            &tiny_model_config(work.path()),
            data.path(),
            args,
            Default::default(),
        )
        .unwrap();

        // nine training samples, batch of three
        assert_eq!(outcome.global_step, 3);
        let last = outcome.history.evals.last().unwrap();
        assert!(last.metrics.get("f1").is_some());
        assert!(last.metrics.get("iou").is_some());
    }

    #[test]
    fn test_missing_validation_subset_fails() {
        let data = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        write_luna_tree(data.path());
        fs::remove_dir_all(data.path().join("subset9")).unwrap();

        let result = run_session::<TestBackend>(
            &tiny_model_config(work.path()),
            data.path(),
            TrainingConfig::quick_test(work.path().join("logs")),
            Default::default(),
        );
        assert!(matches!(result, Err(DetectorError::Io(_))));
    }
}
