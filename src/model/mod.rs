pub mod attention;
pub mod config;
pub mod encoder_layer;
pub mod mlp;
pub mod patch_embedding;
pub mod vit_det;

// Re-export the main types needed by other modules
pub use config::load_model_config;
pub use vit_det::VitDet3D;
