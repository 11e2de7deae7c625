use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use serde::Deserialize;

use crate::data::volume::{check_raw, crop_origin, CtVolume};
use crate::error::{DetectorError, Result};
use crate::evaluation::BoundingBox;

/// LUNA16 ships as ten subsets, `subset0` .. `subset9`
pub const LUNA16_SUBSETS: usize = 10;
/// Subset held out for validation
pub const VALIDATION_SUBSET: usize = 9;

const ANNOTATIONS_FILE: &str = "annotations.json";

/// A single training item ready to be batched
#[derive(Debug, Clone)]
pub struct NoduleItem {
    /// `crop_size³` windowed intensities in `[depth, height, width]` order
    pub volume: Vec<f32>,
    /// 1 when the crop holds a nodule
    pub label: u8,
    /// Nodule box in crop-normalised coordinates, zeros for negatives
    pub bbox: [f32; 6],
}

/// One line of `subsetK/annotations.json`
#[derive(Debug, Clone, Deserialize)]
struct AnnotationEntry {
    /// Raw volume file, relative to the subset directory
    volume: String,
    /// `[depth, height, width]`
    shape: [usize; 3],
    /// Voxel-space box in the same axis order as `shape`
    #[serde(default)]
    nodule: Option<[f32; 6]>,
}

#[derive(Debug, Clone)]
struct SampleRef {
    path: PathBuf,
    shape: [usize; 3],
    nodule: Option<BoundingBox>,
}

/// Nodule crops drawn from a set of LUNA16 subsets
pub struct LunaDataset {
    samples: Vec<SampleRef>,
    crop_size: usize,
}

impl LunaDataset {
    /// Indexes every sample listed under `data_dir/subset{k}` for each `k` in `split`.
    /// Every volume must exist with the byte size its shape implies; voxels are
    /// read lazily, one volume per `get`.
    pub fn new(split: &[usize], data_dir: &Path, crop_size: usize, patch_size: usize) -> Result<Self> {
        if crop_size == 0 || patch_size == 0 || crop_size % patch_size != 0 {
            return Err(DetectorError::InvalidConfig {
                message: format!(
                    "crop size {} must be a positive multiple of patch size {}",
                    crop_size, patch_size
                ),
            });
        }

        let mut samples = Vec::new();
        for &subset in split {
            let subset_dir = data_dir.join(format!("subset{}", subset));
            let text = fs::read_to_string(subset_dir.join(ANNOTATIONS_FILE))?;
            let entries: Vec<AnnotationEntry> = serde_json::from_str(&text)?;
            log::debug!("subset{}: {} annotated volumes", subset, entries.len());

            for entry in entries {
                let path = subset_dir.join(&entry.volume);
                check_raw(&path, entry.shape)?;
                samples.push(SampleRef {
                    path,
                    shape: entry.shape,
                    nodule: entry.nodule.map(BoundingBox::from_coords),
                });
            }
        }

        if samples.is_empty() {
            return Err(DetectorError::EmptySplit(split.to_vec()));
        }

        let positives = samples.iter().filter(|s| s.nodule.is_some()).count();
        log::info!(
            "Dataset over subsets {:?}: {} samples ({} with nodules)",
            split,
            samples.len(),
            positives
        );

        Ok(Self { samples, crop_size })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Reads and crops sample `index`
    pub fn load_item(&self, index: usize) -> Result<NoduleItem> {
        let sample = self.samples.get(index).ok_or(DetectorError::ShapeMismatch {
            context: "dataset index",
            expected: self.samples.len(),
            got: index,
        })?;
        let volume = CtVolume::read_raw(&sample.path, sample.shape)?;

        let center = match &sample.nodule {
            Some(b) => b.center(),
            None => sample.shape.map(|s| s as f32 / 2.0),
        };
        let origin = crop_origin(center, self.crop_size);
        let voxels = volume.crop_normalized(origin, self.crop_size);

        let (label, bbox) = match &sample.nodule {
            Some(b) => (1, self.to_crop_coords(b, origin)),
            None => (0, [0.0; 6]),
        };

        Ok(NoduleItem {
            volume: voxels,
            label,
            bbox,
        })
    }

    /// Voxel box relative to the crop, scaled to `[0, 1]`
    fn to_crop_coords(&self, b: &BoundingBox, origin: [i64; 3]) -> [f32; 6] {
        let size = self.crop_size as f32;
        let mut out = [0.0; 6];
        for axis in 0..3 {
            let o = origin[axis] as f32;
            out[axis] = ((b.min[axis] - o) / size).clamp(0.0, 1.0);
            out[axis + 3] = ((b.max[axis] - o) / size).clamp(0.0, 1.0);
        }
        out
    }
}

/// burn reads `None` as the end of the data. A sample that fails to load after
/// construction therefore shortens the pass, and the trainer rejects any pass
/// that yields fewer items than `len`.
impl Dataset<NoduleItem> for LunaDataset {
    fn get(&self, index: usize) -> Option<NoduleItem> {
        match self.load_item(index) {
            Ok(item) => Some(item),
            Err(e) => {
                log::error!("Could not load sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Partitions `0..total_count` into training and validation indices.
///
/// Validation is exactly the reserved indices that fall in range (sorted,
/// duplicates removed); training is everything else in ascending order.
pub fn split(total_count: usize, reserved: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let valid: BTreeSet<usize> = reserved
        .iter()
        .copied()
        .filter(|&i| i < total_count)
        .collect();
    let train = (0..total_count).filter(|i| !valid.contains(i)).collect();
    (train, valid.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::volume::HU_MAX;

    fn write_subset(root: &Path, subset: usize, entries: &str, volumes: &[(&str, usize)]) {
        let dir = root.join(format!("subset{}", subset));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ANNOTATIONS_FILE), entries).unwrap();
        for (name, voxels) in volumes {
            let bytes: Vec<u8> = std::iter::repeat(HU_MAX.to_le_bytes())
                .take(*voxels)
                .flatten()
                .collect();
            fs::write(dir.join(name), bytes).unwrap();
        }
    }

    #[test]
    fn test_luna_split() {
        let (train, valid) = split(LUNA16_SUBSETS, &[VALIDATION_SUBSET]);
        assert_eq!(valid, vec![9]);
        assert_eq!(train, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_disjoint_and_covering() {
        for total in 0..12 {
            let (train, valid) = split(total, &[3, 7, 3, 40]);
            let mut all: Vec<usize> = train.iter().chain(&valid).copied().collect();
            all.sort();
            assert_eq!(all, (0..total).collect::<Vec<_>>());
            assert!(train.iter().all(|i| !valid.contains(i)));
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        assert_eq!(split(10, &[2, 5]), split(10, &[5, 2]));
    }

    #[test]
    fn test_rejects_patch_that_does_not_tile_crop() {
        let dir = tempfile::tempdir().unwrap();
        let result = LunaDataset::new(&[0], dir.path(), 10, 4);
        assert!(matches!(result, Err(DetectorError::InvalidConfig { .. })));
    }

    #[test]
    fn test_empty_split() {
        let dir = tempfile::tempdir().unwrap();
        write_subset(dir.path(), 0, "[]", &[]);
        assert!(matches!(
            LunaDataset::new(&[0], dir.path(), 4, 2),
            Err(DetectorError::EmptySplit(_))
        ));
    }

    #[test]
    fn test_loads_positive_and_negative_crops() {
        let dir = tempfile::tempdir().unwrap();
        write_subset(
            dir.path(),
            1,
            r#"[
                {"volume": "a.raw", "shape": [8, 8, 8], "nodule": [2, 2, 2, 6, 6, 6]},
                {"volume": "b.raw", "shape": [8, 8, 8]}
            ]"#,
            &[("a.raw", 512), ("b.raw", 512)],
        );

        let dataset = LunaDataset::new(&[1], dir.path(), 8, 4).unwrap();
        assert_eq!(dataset.len(), 2);

        let pos = dataset.get(0).unwrap();
        assert_eq!(pos.label, 1);
        assert_eq!(pos.volume.len(), 512);
        assert_eq!(pos.bbox, [0.25, 0.25, 0.25, 0.75, 0.75, 0.75]);
        assert!(pos.volume.iter().all(|&v| v == 1.0));

        let neg = dataset.get(1).unwrap();
        assert_eq!(neg.label, 0);
        assert_eq!(neg.bbox, [0.0; 6]);
    }

    #[test]
    fn test_missing_volume_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_subset(
            dir.path(),
            0,
            r#"[
                {"volume": "s0.raw", "shape": [4, 4, 4]},
                {"volume": "s1.raw", "shape": [4, 4, 4]},
                {"volume": "s2.raw", "shape": [4, 4, 4]}
            ]"#,
            &[("s0.raw", 64), ("s2.raw", 64)],
        );
        assert!(matches!(
            LunaDataset::new(&[0], dir.path(), 4, 2),
            Err(DetectorError::Io(_))
        ));
    }

    #[test]
    fn test_truncated_volume_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_subset(
            dir.path(),
            0,
            r#"[{"volume": "short.raw", "shape": [4, 4, 4]}]"#,
            &[("short.raw", 63)],
        );
        assert!(matches!(
            LunaDataset::new(&[0], dir.path(), 4, 2),
            Err(DetectorError::InvalidVolume { .. })
        ));
    }

    #[test]
    fn test_volume_removed_after_construction_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        write_subset(
            dir.path(),
            0,
            r#"[{"volume": "scan.raw", "shape": [4, 4, 4]}]"#,
            &[("scan.raw", 64)],
        );
        let dataset = LunaDataset::new(&[0], dir.path(), 4, 2).unwrap();
        fs::remove_file(dir.path().join("subset0/scan.raw")).unwrap();
        assert!(dataset.get(0).is_none());
    }
}
