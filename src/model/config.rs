use std::path::Path;

use burn::config::Config;

use crate::error::DetectorError;

/// Backbone and input geometry for `VitDet3D`, stored as `model_config.json`.
/// Field names follow the usual ViT config layout.
#[derive(Config, Debug)]
pub struct VitDet3DConfig {
    /// Side of the cubic input crop, in voxels
    pub image_size: usize,
    /// Side of one cubic patch, in voxels
    pub patch_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 6)]
    pub num_hidden_layers: usize,
    #[config(default = 8)]
    pub num_attention_heads: usize,
    #[config(default = 1024)]
    pub intermediate_size: usize,
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,
    #[config(default = 0.0)]
    pub attention_probs_dropout_prob: f64,
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
}

impl VitDet3DConfig {
    /// Patches along one axis
    pub fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        self.grid_size().pow(3)
    }

    pub fn patch_voxels(&self) -> usize {
        self.patch_size.pow(3)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |message: String| Err(DetectorError::InvalidConfig { message });

        if self.patch_size == 0 || self.image_size == 0 {
            return invalid("image_size and patch_size must be positive".to_string());
        }
        if self.image_size % self.patch_size != 0 {
            return invalid(format!(
                "image_size {} is not divisible by patch_size {}",
                self.image_size, self.patch_size
            ));
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return invalid(format!(
                "hidden_size {} must be divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            ));
        }
        Ok(())
    }

    /// Rough trainable parameter count, for the startup banner
    pub fn count_parameters(&self) -> usize {
        let h = self.hidden_size;
        let embed = self.patch_voxels() * h + h + self.num_patches() * h;

        // attention (4 projections) + mlp + 2 layer norms
        let per_layer = 4 * (h * h + h)
            + 2 * h * self.intermediate_size
            + self.intermediate_size
            + h
            + 4 * h;

        // final norm + presence head + box head
        let heads = 2 * h + (h + 1) + (6 * h + 6);

        embed + self.num_hidden_layers * per_layer + heads
    }
}

/// Loads and validates the model configuration file
pub fn load_model_config(path: &Path) -> crate::error::Result<VitDet3DConfig> {
    let config = VitDet3DConfig::load(path)
        .map_err(|e| DetectorError::Config(format!("{}: {:?}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        let config = VitDet3DConfig::new(64, 16);
        assert_eq!(config.grid_size(), 4);
        assert_eq!(config.num_patches(), 64);
        assert_eq!(config.patch_voxels(), 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_untiled_crop() {
        let config = VitDet3DConfig::new(60, 16);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_uneven_heads() {
        let config = VitDet3DConfig::new(64, 16).with_num_attention_heads(7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_config.json");
        VitDet3DConfig::new(32, 8)
            .with_hidden_size(64)
            .save(&path)
            .unwrap();

        let loaded = load_model_config(&path).unwrap();
        assert_eq!(loaded.image_size, 32);
        assert_eq!(loaded.hidden_size, 64);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_model_config(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(DetectorError::Config(_))));
    }
}
