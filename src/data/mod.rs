pub mod batcher;
pub mod dataset;
pub mod volume;

pub use batcher::{NoduleBatch, NoduleBatcher};
pub use dataset::{split, LunaDataset, LUNA16_SUBSETS, VALIDATION_SUBSET};
