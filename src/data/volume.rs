use std::fs;
use std::path::Path;

use crate::error::{DetectorError, Result};

/// Lower edge of the lung HU window (air)
pub const HU_MIN: f32 = -1000.0;
/// Upper edge of the lung HU window
pub const HU_MAX: f32 = 400.0;

/// A CT scan held as Hounsfield units in `[depth, height, width]` order
#[derive(Debug, Clone)]
pub struct CtVolume {
    shape: [usize; 3],
    voxels: Vec<f32>,
}

impl CtVolume {
    pub fn from_voxels(shape: [usize; 3], voxels: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if voxels.len() != expected {
            return Err(DetectorError::ShapeMismatch {
                context: "volume voxels",
                expected,
                got: voxels.len(),
            });
        }
        Ok(Self { shape, voxels })
    }

    /// Reads a headerless little-endian f32 volume
    pub fn read_raw(path: &Path, shape: [usize; 3]) -> Result<Self> {
        let bytes = fs::read(path)?;
        ensure_raw_size(path, shape, bytes.len() as u64)?;

        let voxels = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::from_voxels(shape, voxels)
    }

    /// Voxel at signed coordinates, or `None` outside the scan
    fn voxel(&self, z: i64, y: i64, x: i64) -> Option<f32> {
        let [d, h, w] = self.shape;
        if z < 0 || y < 0 || x < 0 || z >= d as i64 || y >= h as i64 || x >= w as i64 {
            return None;
        }
        let idx = (z as usize * h + y as usize) * w + x as usize;
        self.voxels.get(idx).copied()
    }

    /// Cube of side `size` starting at `origin`, padded with air and windowed to `[0, 1]`
    pub fn crop_normalized(&self, origin: [i64; 3], size: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(size * size * size);
        for dz in 0..size as i64 {
            for dy in 0..size as i64 {
                for dx in 0..size as i64 {
                    let hu = self
                        .voxel(origin[0] + dz, origin[1] + dy, origin[2] + dx)
                        .unwrap_or(HU_MIN);
                    out.push(window_hu(hu));
                }
            }
        }
        out
    }
}

/// Checks that a raw volume exists and holds exactly `shape` f32 voxels, without reading it
pub fn check_raw(path: &Path, shape: [usize; 3]) -> Result<()> {
    let found = fs::metadata(path)?.len();
    ensure_raw_size(path, shape, found)
}

fn ensure_raw_size(path: &Path, shape: [usize; 3], found: u64) -> Result<()> {
    let expected = (shape.iter().product::<usize>() * 4) as u64;
    if found != expected {
        return Err(DetectorError::InvalidVolume {
            path: path.display().to_string(),
            message: format!("expected {} bytes for shape {:?}, found {}", expected, shape, found),
        });
    }
    Ok(())
}

pub fn window_hu(hu: f32) -> f32 {
    ((hu - HU_MIN) / (HU_MAX - HU_MIN)).clamp(0.0, 1.0)
}

/// Start corner of a `size`-cube centred on `center`
pub fn crop_origin(center: [f32; 3], size: usize) -> [i64; 3] {
    let half = size as f32 / 2.0;
    [
        (center[0] - half).round() as i64,
        (center[1] - half).round() as i64,
        (center[2] - half).round() as i64,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_hu_clamps() {
        assert_eq!(window_hu(-2000.0), 0.0);
        assert_eq!(window_hu(HU_MIN), 0.0);
        assert_eq!(window_hu(HU_MAX), 1.0);
        assert_eq!(window_hu(3000.0), 1.0);
    }

    #[test]
    fn test_crop_pads_outside_with_air() {
        let vol = CtVolume::from_voxels([2, 2, 2], vec![HU_MAX; 8]).unwrap();
        let crop = vol.crop_normalized([-1, -1, -1], 3);
        assert_eq!(crop.len(), 27);
        // corner (0,0,0) lies outside the scan, (1,1,1) maps to voxel (0,0,0)
        assert_eq!(crop[0], 0.0);
        assert_eq!(crop[13], 1.0);
    }

    #[test]
    fn test_crop_origin_centres() {
        assert_eq!(crop_origin([16.0, 16.0, 16.0], 8), [12, 12, 12]);
    }

    #[test]
    fn test_read_raw_rejects_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.raw");
        fs::write(&path, [0u8; 12]).unwrap();
        assert!(matches!(
            CtVolume::read_raw(&path, [2, 2, 2]),
            Err(DetectorError::InvalidVolume { .. })
        ));
    }

    #[test]
    fn test_check_raw_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.raw");
        fs::write(&path, [0u8; 32]).unwrap();
        assert!(check_raw(&path, [2, 2, 2]).is_ok());
        assert!(matches!(
            check_raw(&path, [2, 2, 3]),
            Err(DetectorError::InvalidVolume { .. })
        ));
        assert!(matches!(
            check_raw(&dir.path().join("gone.raw"), [2, 2, 2]),
            Err(DetectorError::Io(_))
        ));
    }

    #[test]
    fn test_read_raw_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.raw");
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        fs::write(&path, bytes).unwrap();
        let vol = CtVolume::read_raw(&path, [1, 1, 2]).unwrap();
        assert_eq!(vol.voxel(0, 0, 1), Some(-2.0));
    }
}
