use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

/// Axis-aligned 3D box: lower corner `min`, upper corner `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Builds a box from the flat `(x_min, y_min, z_min, x_max, y_max, z_max)` layout
    pub fn from_coords(c: [f32; 6]) -> Self {
        Self::new([c[0], c[1], c[2]], [c[3], c[4], c[5]])
    }

    pub fn volume(&self) -> f64 {
        (0..3)
            .map(|axis| (self.max[axis] - self.min[axis]) as f64)
            .product()
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Volume shared with `other`; zero when the boxes miss on any axis
    pub fn intersection_volume(&self, other: &BoundingBox) -> f64 {
        (0..3)
            .map(|axis| {
                let low = self.min[axis].max(other.min[axis]);
                let high = self.max[axis].min(other.max[axis]);
                ((high - low) as f64).max(0.0)
            })
            .product()
    }
}

/// Intersection-over-union of two boxes.
///
/// When both boxes have zero volume the union is zero and the result is
/// NaN. That case is left to the caller.
pub fn iou_3d(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let inter = a.intersection_volume(b);
    let union = a.volume() + b.volume() - inter;
    inter / union
}

/// Mean IoU over paired predicted / ground-truth boxes.
///
/// NaN pairs (zero union) are not filtered, so a single degenerate pair
/// turns the mean into NaN.
pub fn mean_iou_3d(pred: &[BoundingBox], gt: &[BoundingBox]) -> Result<f64> {
    if pred.len() != gt.len() {
        return Err(DetectorError::ShapeMismatch {
            context: "iou ground-truth boxes",
            expected: pred.len(),
            got: gt.len(),
        });
    }
    if pred.is_empty() {
        return Err(DetectorError::EmptyInput("mean IoU needs at least one box pair"));
    }

    let total: f64 = pred.iter().zip(gt).map(|(p, g)| iou_3d(p, g)).sum();
    Ok(total / pred.len() as f64)
}
