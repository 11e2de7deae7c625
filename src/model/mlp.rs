use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::model::config::VitDet3DConfig;

/// Two-layer GELU MLP applied per token after attention
#[derive(Module, Debug)]
pub struct EncoderMlp<B: Backend> {
    intermediate: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
    activation: Gelu,
}

impl<B: Backend> EncoderMlp<B> {
    pub fn new(config: &VitDet3DConfig, device: &B::Device) -> Self {
        Self {
            intermediate: LinearConfig::new(config.hidden_size, config.intermediate_size)
                .init(device),
            output: LinearConfig::new(config.intermediate_size, config.hidden_size).init(device),
            dropout: DropoutConfig::new(config.hidden_dropout_prob).init(),
            activation: Gelu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.activation.forward(self.intermediate.forward(x));
        self.dropout.forward(self.output.forward(x))
    }
}
