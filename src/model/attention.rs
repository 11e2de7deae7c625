use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Tensor},
};

use crate::model::config::VitDet3DConfig;

/// Multi-head self attention over patch tokens
#[derive(Module, Debug)]
pub struct PatchSelfAttention<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    output: Linear<B>,
    dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl<B: Backend> PatchSelfAttention<B> {
    pub fn new(config: &VitDet3DConfig, device: &B::Device) -> Self {
        let hidden = config.hidden_size;
        Self {
            query: LinearConfig::new(hidden, hidden).init(device),
            key: LinearConfig::new(hidden, hidden).init(device),
            value: LinearConfig::new(hidden, hidden).init(device),
            output: LinearConfig::new(hidden, hidden).init(device),
            dropout: DropoutConfig::new(config.attention_probs_dropout_prob).init(),
            num_heads: config.num_attention_heads,
            head_dim: hidden / config.num_attention_heads,
        }
    }

    /// x: [batch, tokens, hidden] -> [batch, tokens, hidden]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, tokens, hidden] = x.dims();

        let q = self.split_heads(self.query.forward(x.clone()), batch, tokens);
        let k = self.split_heads(self.key.forward(x.clone()), batch, tokens);
        let v = self.split_heads(self.value.forward(x), batch, tokens);

        let scale = (self.head_dim as f64).sqrt();
        let scores = q.matmul(k.swap_dims(2, 3)) / scale; // [batch, heads, tokens, tokens]
        let weights = self.dropout.forward(burn::tensor::activation::softmax(scores, 3));

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, hidden]);

        self.output.forward(context)
    }

    /// [batch, tokens, hidden] -> [batch, heads, tokens, head_dim]
    fn split_heads(&self, x: Tensor<B, 3>, batch: usize, tokens: usize) -> Tensor<B, 4> {
        x.reshape([batch, tokens, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }
}
