//! Adapter construction keyed by provider.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;
use crate::image::provider::ImageGenerationService;

/// Builds the adapter for `kind` from `config`.
///
/// `Custom` endpoints speak the fal protocol and get a fal adapter pointed at
/// the configured base URL. A provider compiled out of this build yields
/// `ProviderNotAvailable`.
pub fn create_generation_service(
    kind: ProviderKind,
    config: &ProviderConfig,
) -> Result<Box<dyn ImageGenerationService>> {
    let mut config = config.clone();
    config.provider = kind;

    tracing::debug!(provider = %kind, "creating generation service");

    match kind {
        ProviderKind::Fal | ProviderKind::Custom => fal_service(&config),
        ProviderKind::Google => gemini_service(&config),
    }
}

/// Parses a provider tag, then builds its adapter. Unknown tags fail with
/// `UnknownProvider`.
pub fn create_generation_service_from_tag(
    tag: &str,
    config: &ProviderConfig,
) -> Result<Box<dyn ImageGenerationService>> {
    create_generation_service(tag.parse()?, config)
}

#[cfg(feature = "fal-image")]
fn fal_service(config: &ProviderConfig) -> Result<Box<dyn ImageGenerationService>> {
    let service = crate::image::providers::FalImageService::from_config(config)?;
    Ok(Box::new(service))
}

#[cfg(not(feature = "fal-image"))]
fn fal_service(config: &ProviderConfig) -> Result<Box<dyn ImageGenerationService>> {
    Err(crate::error::GenStudioError::ProviderNotAvailable(
        config.provider.to_string(),
    ))
}

#[cfg(feature = "gemini-image")]
fn gemini_service(config: &ProviderConfig) -> Result<Box<dyn ImageGenerationService>> {
    let service = crate::image::providers::GeminiImageService::from_config(config)?;
    Ok(Box::new(service))
}

#[cfg(not(feature = "gemini-image"))]
fn gemini_service(config: &ProviderConfig) -> Result<Box<dyn ImageGenerationService>> {
    Err(crate::error::GenStudioError::ProviderNotAvailable(
        config.provider.to_string(),
    ))
}

#[cfg(all(test, feature = "fal-image", feature = "gemini-image"))]
mod tests {
    use super::*;
    use crate::error::GenStudioError;

    #[test]
    fn test_factory_maps_kinds() {
        let fal = create_generation_service(
            ProviderKind::Fal,
            &ProviderConfig::new(ProviderKind::Fal, "k"),
        )
        .unwrap();
        assert_eq!(fal.kind(), ProviderKind::Fal);

        let google = create_generation_service(
            ProviderKind::Google,
            &ProviderConfig::new(ProviderKind::Google, "k"),
        )
        .unwrap();
        assert_eq!(google.kind(), ProviderKind::Google);
        assert_eq!(google.name(), "Gemini (Google)");
    }

    #[test]
    fn test_custom_uses_fal_protocol() {
        let config =
            ProviderConfig::new(ProviderKind::Custom, "k").with_base_url("http://localhost:8080/");
        let service = create_generation_service(ProviderKind::Custom, &config).unwrap();
        assert_eq!(service.kind(), ProviderKind::Custom);
    }

    #[test]
    fn test_custom_without_base_url_fails() {
        let config = ProviderConfig::new(ProviderKind::Custom, "k");
        let err = create_generation_service(ProviderKind::Custom, &config)
            .err()
            .unwrap();
        assert!(matches!(err, GenStudioError::InvalidRequest(_)));
    }

    #[test]
    fn test_unknown_tag() {
        let config = ProviderConfig::new(ProviderKind::Fal, "k");
        let err = create_generation_service_from_tag("midjourney", &config)
            .err()
            .unwrap();
        assert!(matches!(err, GenStudioError::UnknownProvider(_)));

        let service = create_generation_service_from_tag("gemini", &config).unwrap();
        assert_eq!(service.kind(), ProviderKind::Google);
    }

    #[test]
    fn test_missing_key_does_not_fail_construction() {
        let config = ProviderConfig::defaults(ProviderKind::Fal);
        assert!(create_generation_service(ProviderKind::Fal, &config).is_ok());
    }
}
