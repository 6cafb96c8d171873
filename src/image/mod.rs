//! Image generation module.

mod factory;
mod provider;
pub mod providers;
mod types;

pub use factory::{create_generation_service, create_generation_service_from_tag};
pub use provider::{ImageGenerationService, ImageGenerationServiceExt};
pub use types::{
    clamp_num_images, AspectRatio, DataUri, GeneratedImage, GenerationRequest, GenerationResult,
    ModelTier, OutputFormat, Resolution, MAX_NUM_IMAGES, MAX_REFERENCE_IMAGES, MIN_NUM_IMAGES,
};
