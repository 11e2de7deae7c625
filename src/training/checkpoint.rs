use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};
use crate::evaluation::MetricResult;
use crate::model::VitDet3D;

const CHECKPOINT_PREFIX: &str = "checkpoint-";
const MODEL_FILE: &str = "model";
const STATE_FILE: &str = "state.json";

/// Sidecar written next to each saved model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub step: u64,
    pub epoch: usize,
    /// Non-finite metrics (a NaN IoU) are stored as `null`
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl CheckpointState {
    pub fn new(step: u64, epoch: usize, metrics: &MetricResult) -> Self {
        Self {
            step,
            epoch,
            metrics: metrics
                .iter()
                .map(|(name, value)| (name.to_string(), Some(value).filter(|v| v.is_finite())))
                .collect(),
        }
    }
}

/// Saves, rotates and restores `checkpoint-{step}` directories under one root
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
    save_total_limit: usize,
}

impl CheckpointManager {
    pub fn new(root: impl Into<PathBuf>, save_total_limit: usize) -> Self {
        Self {
            root: root.into(),
            save_total_limit,
        }
    }

    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!("{}{}", CHECKPOINT_PREFIX, step))
    }

    pub fn save<B: Backend>(&self, model: &VitDet3D<B>, state: &CheckpointState) -> Result<PathBuf> {
        let dir = self.checkpoint_dir(state.step);
        fs::create_dir_all(&dir)?;

        model
            .clone()
            .save_file(dir.join(MODEL_FILE), &CompactRecorder::new())
            .map_err(|e| DetectorError::Recorder(format!("saving {}: {:?}", dir.display(), e)))?;
        fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;

        log::info!("Checkpoint saved: {}", dir.display());
        Ok(dir)
    }

    pub fn read_state(&self, step: u64) -> Result<CheckpointState> {
        let path = self.checkpoint_dir(step).join(STATE_FILE);
        if !path.exists() {
            return Err(DetectorError::MissingCheckpoint(step));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Loads the weights saved at `step` into `model`
    pub fn load<B: Backend>(
        &self,
        model: VitDet3D<B>,
        step: u64,
        device: &B::Device,
    ) -> Result<VitDet3D<B>> {
        let dir = self.checkpoint_dir(step);
        if !dir.is_dir() {
            return Err(DetectorError::MissingCheckpoint(step));
        }
        model
            .load_file(dir.join(MODEL_FILE), &CompactRecorder::new(), device)
            .map_err(|e| DetectorError::Recorder(format!("loading {}: {:?}", dir.display(), e)))
    }

    /// Steps of every checkpoint currently on disk, ascending
    pub fn saved_steps(&self) -> Result<Vec<u64>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut steps: Vec<u64> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| parse_step(&entry.path()))
            .collect();
        steps.sort_unstable();
        Ok(steps)
    }

    /// Deletes checkpoints beyond the retention limit, sparing `best`
    pub fn rotate(&self, best: Option<u64>) -> Result<Vec<u64>> {
        let doomed = checkpoints_to_delete(&self.saved_steps()?, self.save_total_limit, best);
        for &step in &doomed {
            let dir = self.checkpoint_dir(step);
            log::info!("Deleting older checkpoint {} due to save_total_limit", dir.display());
            fs::remove_dir_all(dir)?;
        }
        Ok(doomed)
    }
}

fn parse_step(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(CHECKPOINT_PREFIX)?
        .parse()
        .ok()
}

/// Picks the checkpoints to remove so that at most `limit` remain.
///
/// The most recent ones are kept, except that `best` (when saved) is always
/// kept and displaces the oldest of them. A `limit` of 0 keeps everything.
pub fn checkpoints_to_delete(saved: &[u64], limit: usize, best: Option<u64>) -> Vec<u64> {
    let mut sorted = saved.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if limit == 0 || sorted.len() <= limit {
        return Vec::new();
    }

    let mut keep: Vec<u64> = best.filter(|b| sorted.contains(b)).into_iter().collect();
    for &step in sorted.iter().rev() {
        if keep.len() >= limit {
            break;
        }
        if !keep.contains(&step) {
            keep.push(step);
        }
    }

    sorted.into_iter().filter(|s| !keep.contains(s)).collect()
}
