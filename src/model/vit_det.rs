use burn::{
    module::Module,
    nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig},
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
};
use crate::{
    data::NoduleBatch,
    evaluation::{BoundingBox, PredictionBatch},
    model::{
        config::VitDet3DConfig,
        encoder_layer::EncoderLayer,
        patch_embedding::PatchEmbedding3d,
    },
};

const SCORE_EPS: f32 = 1e-6;

impl VitDet3DConfig {
    /// Initializes the model on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> VitDet3D<B> {
        let layers = (0..self.num_hidden_layers)
            .map(|_| EncoderLayer::new(self, device))
            .collect();

        VitDet3D {
            embeddings: PatchEmbedding3d::new(self, device),
            layers,
            final_norm: LayerNormConfig::new(self.hidden_size)
                .with_epsilon(self.layer_norm_eps)
                .init(device),
            presence_head: LinearConfig::new(self.hidden_size, 1).init(device),
            bbox_head: LinearConfig::new(self.hidden_size, 6).init(device),
            hidden_size: self.hidden_size,
        }
    }
}

/// Outputs of one forward pass, with the loss when labels were supplied
#[derive(Debug, Clone)]
pub struct DetectionOutput<B: Backend> {
    /// [batch], probability a nodule is present
    pub scores: Tensor<B, 1>,
    /// [batch, 6], crop-normalised `(min, max)` corners
    pub boxes: Tensor<B, 2>,
    pub loss: Tensor<B, 1>,
}

impl<B: Backend> DetectionOutput<B> {
    /// Copies the outputs to the host for metric computation
    pub fn prediction_batch(&self) -> PredictionBatch {
        let scores = self.scores.to_data().iter::<f32>().collect();
        let boxes = self
            .boxes
            .to_data()
            .iter::<f32>()
            .collect::<Vec<_>>()
            .chunks_exact(6)
            .map(|c| BoundingBox::from_coords([c[0], c[1], c[2], c[3], c[4], c[5]]))
            .collect();
        PredictionBatch { scores, boxes }
    }

    pub fn loss_value(&self) -> f64 {
        self.loss.to_data().iter::<f32>().next().unwrap_or(0.0) as f64
    }
}

/// ViT encoder over 3D patches with a presence head and a box head on the mean-pooled tokens
#[derive(Module, Debug)]
pub struct VitDet3D<B: Backend> {
    embeddings: PatchEmbedding3d<B>,
    layers: Vec<EncoderLayer<B>>,
    final_norm: LayerNorm<B>,
    presence_head: Linear<B>,
    bbox_head: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> VitDet3D<B> {
    /// volumes: [batch, d, h, w] -> (scores [batch], boxes [batch, 6])
    pub fn forward(&self, volumes: Tensor<B, 4>) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let [batch, _, _, _] = volumes.dims();

        let mut x = self.embeddings.forward(volumes);
        for layer in &self.layers {
            x = layer.forward(x);
        }
        let pooled = self
            .final_norm
            .forward(x)
            .mean_dim(1)
            .reshape([batch, self.hidden_size]);

        let scores = sigmoid(self.presence_head.forward(pooled.clone())).reshape([batch]);

        // max = min + extent * (1 - min) keeps every box inside [0, 1] with max >= min
        let raw = self.bbox_head.forward(pooled);
        let min = sigmoid(raw.clone().slice([0..batch, 0..3]));
        let extent = sigmoid(raw.slice([0..batch, 3..6]));
        let max = min.clone() + extent * min.clone().neg().add_scalar(1.0);

        (scores, Tensor::cat(vec![min, max], 1))
    }

    /// Forward pass plus loss against the batch's `labels` and `bbox`
    pub fn forward_detection(&self, batch: NoduleBatch<B>) -> DetectionOutput<B> {
        let (scores, boxes) = self.forward(batch.volumes);
        let loss = detection_loss(scores.clone(), boxes.clone(), batch.labels, batch.bbox);
        DetectionOutput { scores, boxes, loss }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

/// Binary cross-entropy on presence plus L1 on the boxes of positive samples.
/// Box loss averages over positive coordinates and is zero without positives.
pub fn detection_loss<B: Backend>(
    scores: Tensor<B, 1>,
    boxes: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
    gt_boxes: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let targets = labels.float();
    let p = scores.clamp(SCORE_EPS, 1.0 - SCORE_EPS);

    let bce = (targets.clone() * p.clone().log()
        + targets.clone().neg().add_scalar(1.0) * p.neg().add_scalar(1.0).log())
    .mean()
    .neg();

    let mask = targets.unsqueeze_dim::<2>(1); // [batch, 1]
    let l1 = ((boxes - gt_boxes).abs() * mask.clone()).sum();
    let positives = mask.sum().mul_scalar(6.0).clamp_min(1.0);

    bce + l1 / positives
}
