/// Binary confusion counts for the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_negative: usize,
}

impl ConfusionCounts {
    /// Tallies paired truth / prediction labels. Any non-zero value counts as positive.
    pub fn from_labels(truth: &[u8], pred: &[u8]) -> Self {
        let mut counts = Self::default();
        for (&t, &p) in truth.iter().zip(pred) {
            match (t != 0, p != 0) {
                (true, true) => counts.true_positive += 1,
                (false, true) => counts.false_positive += 1,
                (true, false) => counts.false_negative += 1,
                (false, false) => counts.true_negative += 1,
            }
        }
        counts
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    /// Harmonic mean of precision and recall, written as `2TP / (2TP + FP + FN)`.
    /// Returns 0.0 when there are no positives at all.
    pub fn f1(&self) -> f64 {
        let denom = 2 * self.true_positive + self.false_positive + self.false_negative;
        if denom == 0 {
            log::warn!("F1 is ill-defined with no true or predicted positives; reporting 0.0");
            return 0.0;
        }
        (2 * self.true_positive) as f64 / denom as f64
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Binarizes scores: strictly above `threshold` is positive
pub fn threshold_scores(scores: &[f32], threshold: f32) -> Vec<u8> {
    scores.iter().map(|&s| u8::from(s > threshold)).collect()
}

pub fn f1_score(truth: &[u8], pred: &[u8]) -> f64 {
    let counts = ConfusionCounts::from_labels(truth, pred);
    log::debug!(
        "precision: {:.4} | recall: {:.4} | {:?}",
        counts.precision(),
        counts.recall(),
        counts
    );
    counts.f1()
}
