pub mod image_config;
pub mod manifest;
pub mod media_types;

pub use manifest::{Descriptor, ImageIndex, Manifest, Platform};
pub use media_types::{LayerType, MediaType};
