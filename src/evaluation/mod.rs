pub mod aggregator;
pub mod classification;
pub mod iou;

pub use aggregator::{
    compute_metrics, EvalPrediction, LabelBatch, MetricResult, MetricsFn, PredictionBatch,
};
pub use iou::BoundingBox;
