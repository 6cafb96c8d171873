#![warn(missing_docs)]
//! GenStudio - Multi-provider AI image generation with a local gallery and prompt presets.
//!
//! This crate provides one interface over several remote image-generation
//! services, a controller for the lifecycle of each generation, and JSON
//! stores for produced images, prompt presets and provider settings.
//!
//! # Quick Start
//!
//! ```no_run
//! use genstudio::{
//!     create_generation_service, GalleryStore, ProviderConfig, ProviderKind, TaskController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> genstudio::Result<()> {
//!     let config = ProviderConfig::new(ProviderKind::Google, "my-api-key");
//!     let service = create_generation_service(ProviderKind::Google, &config)?;
//!     let gallery = GalleryStore::open_default()?;
//!
//!     let mut controller = TaskController::new();
//!     controller.set_prompt("A golden retriever puppy");
//!     let task = controller.run(service.as_ref(), Some(&gallery)).await?;
//!     println!("{:?}", task.status());
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `fal-image`: fal.ai (Nano Banana, Nano Banana Pro), also used for custom endpoints
//! - `gemini-image`: Gemini (Google)
//! - `image`: All image providers
//! - `cli`: Command-line interface

mod config;
mod error;
mod id;

pub mod image;
pub mod paths;
pub mod store;
pub mod task;

// Re-export error and config types at crate root
pub use config::{
    ProviderConfig, ProviderConfigUpdate, ProviderKind, DEFAULT_TIMEOUT_MS, FAL_DEFAULT_BASE_URL,
    GOOGLE_DEFAULT_BASE_URL,
};
pub use error::{sanitize_error_message, ErrorKind, GenStudioError, Result};

pub use image::{
    create_generation_service, create_generation_service_from_tag, AspectRatio, DataUri,
    GeneratedImage, GenerationRequest, GenerationResult, ImageGenerationService,
    ImageGenerationServiceExt, ModelTier, OutputFormat, Resolution,
};

#[cfg(feature = "fal-image")]
pub use image::providers::{FalImageModel, FalImageService, FalImageServiceBuilder};

#[cfg(feature = "gemini-image")]
pub use image::providers::{GeminiImageService, GeminiImageServiceBuilder, GeminiModel};

pub use store::{
    GalleryImage, GalleryStore, NewGalleryImage, PresetStore, PresetUpdate, PromptPreset,
    SettingsStore, SortField, SortOrder,
};
pub use task::{GenerationForm, GenerationTask, TaskController, TaskStatus};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ProviderConfig, ProviderKind};
    pub use crate::error::{GenStudioError, Result};
    pub use crate::image::{
        create_generation_service, GeneratedImage, GenerationRequest, GenerationResult,
        ImageGenerationService, ImageGenerationServiceExt,
    };
    pub use crate::store::{GalleryStore, PresetStore, SettingsStore};
    pub use crate::task::TaskController;

    #[cfg(feature = "fal-image")]
    pub use crate::image::providers::FalImageService;

    #[cfg(feature = "gemini-image")]
    pub use crate::image::providers::GeminiImageService;
}
