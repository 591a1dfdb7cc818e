//! Tomato leaf disease classification: the inference service and its offline trainer.

pub mod annotate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod relay;
pub mod routes;
pub mod state;
pub mod training;
pub mod utils;

/// Side length of the square images the classifier consumes.
pub const IMAGE_SIZE: u32 = 224;

/// Uploads above this size are rejected before decoding.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
