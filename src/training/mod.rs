pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod trainer;

pub use orchestrator::train;
