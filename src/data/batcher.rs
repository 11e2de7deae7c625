use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use crate::data::dataset::NoduleItem;
use crate::evaluation::{BoundingBox, LabelBatch};

#[derive(Debug, Clone)]
pub struct NoduleBatch<B: Backend> {
    /// [batch, depth, height, width]
    pub volumes: Tensor<B, 4>,
    /// [batch], 0 or 1
    pub labels: Tensor<B, 1, Int>,
    /// [batch, 6]
    pub bbox: Tensor<B, 2>,
}

impl<B: Backend> NoduleBatch<B> {
    /// Pulls the label fields back to the host for metric computation
    pub fn label_batch(&self) -> LabelBatch {
        let labels: Vec<u8> = self
            .labels
            .to_data()
            .iter::<i64>()
            .map(|l| u8::from(l != 0))
            .collect();
        let boxes = self
            .bbox
            .to_data()
            .iter::<f32>()
            .collect::<Vec<_>>()
            .chunks_exact(6)
            .map(|c| BoundingBox::from_coords([c[0], c[1], c[2], c[3], c[4], c[5]]))
            .collect();
        LabelBatch { labels, boxes }
    }
}

/// Collates `NoduleItem`s into a `NoduleBatch`
#[derive(Clone, Debug, Default)]
pub struct NoduleBatcher;

impl NoduleBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, NoduleItem, NoduleBatch<B>> for NoduleBatcher {
    fn batch(&self, items: Vec<NoduleItem>, device: &B::Device) -> NoduleBatch<B> {
        let batch_size = items.len();
        let voxels_per_item = items.first().map(|item| item.volume.len()).unwrap_or(0);
        let side = (voxels_per_item as f64).cbrt().round() as usize;

        let volumes_flat: Vec<f32> = items
            .iter()
            .flat_map(|item| item.volume.iter().copied())
            .collect();

        let labels_flat: Vec<i32> = items
            .iter()
            .map(|item| item.label as i32)
            .collect();

        let bbox_flat: Vec<f32> = items
            .iter()
            .flat_map(|item| item.bbox)
            .collect();

        let volumes = Tensor::<B, 4>::from_data(
            TensorData::new(volumes_flat, [batch_size, side, side, side]),
            device,
        );

        let labels = Tensor::<B, 1, Int>::from_ints(
            labels_flat.as_slice(),
            device,
        );

        let bbox = Tensor::<B, 2>::from_data(
            TensorData::new(bbox_flat, [batch_size, 6]),
            device,
        );

        NoduleBatch {
            volumes,
            labels,
            bbox,
        }
    }
}
