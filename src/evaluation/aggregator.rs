use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};
use crate::evaluation::classification::{f1_score, threshold_scores};
use crate::evaluation::iou::{mean_iou_3d, BoundingBox};

/// Score above which a sample counts as "nodule present"
pub const PRESENCE_THRESHOLD: f32 = 0.5;

/// Raw model outputs gathered over an evaluation pass
#[derive(Debug, Clone, Default)]
pub struct PredictionBatch {
    pub scores: Vec<f32>,
    pub boxes: Vec<BoundingBox>,
}

/// Ground truth matching a `PredictionBatch`; boxes only mean something where `labels[i] != 0`
#[derive(Debug, Clone, Default)]
pub struct LabelBatch {
    pub labels: Vec<u8>,
    pub boxes: Vec<BoundingBox>,
}

#[derive(Debug, Clone, Default)]
pub struct EvalPrediction {
    pub predictions: PredictionBatch,
    pub groundtruth: LabelBatch,
}

impl EvalPrediction {
    pub fn len(&self) -> usize {
        self.groundtruth.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groundtruth.labels.is_empty()
    }

    /// Appends another batch worth of outputs
    pub fn extend(&mut self, other: EvalPrediction) {
        self.predictions.scores.extend(other.predictions.scores);
        self.predictions.boxes.extend(other.predictions.boxes);
        self.groundtruth.labels.extend(other.groundtruth.labels);
        self.groundtruth.boxes.extend(other.groundtruth.boxes);
    }

    fn check_shapes(&self) -> Result<()> {
        let n = self.groundtruth.labels.len();
        let lengths = [
            ("prediction scores", self.predictions.scores.len()),
            ("prediction boxes", self.predictions.boxes.len()),
            ("ground-truth boxes", self.groundtruth.boxes.len()),
        ];
        for (context, got) in lengths {
            if got != n {
                return Err(DetectorError::ShapeMismatch { context, expected: n, got });
            }
        }
        Ok(())
    }
}

/// Named scalar metrics from one evaluation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricResult(BTreeMap<String, f64>);

impl MetricResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for MetricResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{}: {:.4}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Signature of the evaluation callback handed to the trainer
pub type MetricsFn = fn(&EvalPrediction) -> Result<MetricResult>;

/// Reduces one evaluation pass to `f1` and `iou`.
///
/// F1 is computed over every sample. IoU only over samples whose ground
/// truth holds a nodule; when there are none, `iou` is 1.0.
pub fn compute_metrics(eval: &EvalPrediction) -> Result<MetricResult> {
    eval.check_shapes()?;

    let labels = &eval.groundtruth.labels;
    let (pred_boxes, gt_boxes): (Vec<BoundingBox>, Vec<BoundingBox>) = labels
        .iter()
        .zip(eval.predictions.boxes.iter().zip(&eval.groundtruth.boxes))
        .filter(|(label, _)| **label != 0)
        .map(|(_, (p, g))| (*p, *g))
        .unzip();

    let preds = threshold_scores(&eval.predictions.scores, PRESENCE_THRESHOLD);
    let f1 = f1_score(labels, &preds);

    let iou = if gt_boxes.is_empty() {
        1.0
    } else {
        mean_iou_3d(&pred_boxes, &gt_boxes)?
    };

    let mut result = MetricResult::new();
    result.insert("f1", f1);
    result.insert("iou", iou);
    Ok(result)
}
