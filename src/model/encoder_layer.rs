use burn::{
    module::Module,
    nn::{LayerNorm, LayerNormConfig},
    tensor::{backend::Backend, Tensor},
};
use crate::model::{
    attention::PatchSelfAttention,
    config::VitDet3DConfig,
    mlp::EncoderMlp,
};

/// Pre-norm encoder block:
/// x -> LayerNorm -> attention -> residual -> LayerNorm -> MLP -> residual
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    attention: PatchSelfAttention<B>,
    mlp: EncoderMlp<B>,
    norm_before: LayerNorm<B>,
    norm_after: LayerNorm<B>,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn new(config: &VitDet3DConfig, device: &B::Device) -> Self {
        let norm = || {
            LayerNormConfig::new(config.hidden_size)
                .with_epsilon(config.layer_norm_eps)
                .init(device)
        };
        Self {
            attention: PatchSelfAttention::new(config, device),
            mlp: EncoderMlp::new(config, device),
            norm_before: norm(),
            norm_after: norm(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attention.forward(self.norm_before.forward(x));
        x.clone() + self.mlp.forward(self.norm_after.forward(x))
    }
}
