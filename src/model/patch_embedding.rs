use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Int, Tensor},
};

use crate::model::config::VitDet3DConfig;

/// Cuts a cubic volume into non-overlapping cubic patches and projects each to `hidden_size`
#[derive(Module, Debug)]
pub struct PatchEmbedding3d<B: Backend> {
    projection: Linear<B>,
    position_embedding: Embedding<B>,
    dropout: Dropout,
    patch_size: usize,
}

impl<B: Backend> PatchEmbedding3d<B> {
    pub fn new(config: &VitDet3DConfig, device: &B::Device) -> Self {
        Self {
            projection: LinearConfig::new(config.patch_voxels(), config.hidden_size).init(device),
            position_embedding: EmbeddingConfig::new(config.num_patches(), config.hidden_size)
                .init(device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
            patch_size: config.patch_size,
        }
    }

    /// volumes: [batch, depth, height, width] -> tokens: [batch, num_patches, hidden]
    pub fn forward(&self, volumes: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, depth, height, width] = volumes.dims();
        let p = self.patch_size;
        let (gd, gh, gw) = (depth / p, height / p, width / p);
        let num_patches = gd * gh * gw;
        let device = volumes.device();

        // [batch*gd, p, gh, p, gw, p] -> [batch*gd, gh, gw, p, p, p]
        let patches = volumes
            .reshape([batch * gd, p, gh, p, gw, p])
            .permute([0, 2, 4, 1, 3, 5])
            .reshape([batch, num_patches, p * p * p]);

        let tokens = self.projection.forward(patches);

        let position_ids = Tensor::<B, 1, Int>::arange(0..num_patches as i64, &device)
            .unsqueeze::<2>()
            .expand([batch, num_patches]);
        let positions = self.position_embedding.forward(position_ids);

        self.dropout.forward(tokens + positions)
    }
}
