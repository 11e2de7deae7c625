use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::evaluation::MetricResult;

/// Running mean of the training loss between two log points
#[derive(Debug, Default)]
pub struct LossAccumulator {
    total_loss: f64,
    num_batches: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64) {
        self.total_loss += loss;
        self.num_batches += 1;
    }

    pub fn avg_loss(&self) -> f64 {
        if self.num_batches == 0 { return 0.0; }
        self.total_loss / self.num_batches as f64
    }

    pub fn is_empty(&self) -> bool {
        self.num_batches == 0
    }

    /// Returns the mean so far and starts over
    pub fn take(&mut self) -> f64 {
        let avg = self.avg_loss();
        *self = Self::default();
        avg
    }
}

/// One `logging_steps` entry
#[derive(Debug, Clone)]
pub struct TrainLogEntry {
    pub step: u64,
    pub epoch: usize,
    pub loss: f64,
}

/// One evaluation pass
#[derive(Debug, Clone)]
pub struct EvalRecord {
    pub step: u64,
    pub epoch: usize,
    pub eval_loss: f64,
    pub metrics: MetricResult,
}

impl EvalRecord {
    pub fn print(&self) {
        log::info!(
            "Eval  step {:>6} | epoch {:>3} | loss: {:.4} | {}",
            self.step, self.epoch, self.eval_loss, self.metrics
        );
    }
}

/// Ordered log of everything measured during a run
#[derive(Debug, Default)]
pub struct TrainingHistory {
    pub train_log: Vec<TrainLogEntry>,
    pub evals: Vec<EvalRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_train(&mut self, entry: TrainLogEntry) {
        log::info!(
            "Train step {:>6} | epoch {:>3} | loss: {:.4}",
            entry.step, entry.epoch, entry.loss
        );
        self.train_log.push(entry);
    }

    pub fn push_eval(&mut self, record: EvalRecord) {
        record.print();
        self.evals.push(record);
    }

    /// Arg-max (or arg-min) of `metric` over the evaluations.
    /// Missing or NaN values never win; ties keep the earlier step.
    pub fn best_record(&self, metric: &str, greater_is_better: bool) -> Option<&EvalRecord> {
        best_by_metric(&self.evals, metric, greater_is_better)
    }

    /// Writes `train_log.csv` and `history.csv` into `dir`
    pub fn save_csv(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let mut file = fs::File::create(dir.join("train_log.csv"))?;
        writeln!(file, "step,epoch,loss")?;
        for e in &self.train_log {
            writeln!(file, "{},{},{:.6}", e.step, e.epoch, e.loss)?;
        }

        let mut names: Vec<&str> = self
            .evals
            .iter()
            .flat_map(|r| r.metrics.iter().map(|(name, _)| name))
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut file = fs::File::create(dir.join("history.csv"))?;
        writeln!(file, "step,epoch,eval_loss,{}", names.join(","))?;
        for r in &self.evals {
            let values: Vec<String> = names
                .iter()
                .map(|name| r.metrics.get(name).map(|v| format!("{:.6}", v)).unwrap_or_default())
                .collect();
            writeln!(file, "{},{},{:.6},{}", r.step, r.epoch, r.eval_loss, values.join(","))?;
        }

        log::debug!("Training history saved to {}", dir.display());
        Ok(())
    }
}

pub fn best_by_metric<'a>(
    records: &'a [EvalRecord],
    metric: &str,
    greater_is_better: bool,
) -> Option<&'a EvalRecord> {
    let mut best: Option<(&EvalRecord, f64)> = None;
    for record in records {
        let Some(value) = record.metrics.get(metric).filter(|v| !v.is_nan()) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, current)) if greater_is_better => value > current,
            Some((_, current)) => value < current,
        };
        if better {
            best = Some((record, value));
        }
    }
    best.map(|(record, _)| record)
}
