//! Image generation service trait and utilities.

use crate::config::ProviderKind;
use crate::error::Result;
use crate::image::types::{GenerationRequest, GenerationResult};
use async_trait::async_trait;
use std::time::Duration;

/// Trait implemented by every provider adapter.
///
/// Generation calls never return `Err`: every failure is folded into a
/// failed [`GenerationResult`]. Callers cancel by dropping the future.
#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Generates images from a text prompt.
    async fn text_to_image(&self, request: &GenerationRequest) -> GenerationResult;

    /// Generates images guided by the request's reference images.
    async fn image_to_image(&self, request: &GenerationRequest) -> GenerationResult;

    /// Checks that the credentials are accepted.
    ///
    /// Returns `Err(InvalidCredential)` when the provider rejects the key and
    /// `Err(MissingCredential)` when none is configured. Any other outcome,
    /// including a network failure, is inconclusive and yields `Ok(true)`.
    async fn test_connection(&self) -> Result<bool>;

    /// Returns the kind of this provider.
    fn kind(&self) -> ProviderKind;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str {
        match self.kind() {
            ProviderKind::Fal => "fal.ai",
            ProviderKind::Google => "Gemini (Google)",
            ProviderKind::Custom => "Custom (fal-compatible)",
        }
    }
}

/// Extension trait with dispatch and retry helpers.
#[async_trait]
pub trait ImageGenerationServiceExt: ImageGenerationService {
    /// Routes to image-to-image when the request has references, else text-to-image.
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        if request.is_image_to_image() {
            self.image_to_image(request).await
        } else {
            self.text_to_image(request).await
        }
    }

    /// Generates with automatic retries on transient failures.
    async fn generate_with_retries(
        &self,
        request: &GenerationRequest,
        max_retries: u32,
    ) -> GenerationResult {
        let mut attempt = 0;
        loop {
            let result = self.generate(request).await;
            let retry_delay = result
                .error_kind()
                .filter(|kind| kind.is_retryable())
                .map(|kind| kind.retry_after().unwrap_or(Duration::from_secs(1)));
            let delay = match retry_delay {
                Some(delay) if !result.success() && attempt < max_retries => delay,
                _ => return result,
            };

            attempt += 1;
            tracing::warn!(
                provider = %self.kind(),
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient error: {}",
                result.error().unwrap_or_default()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl<T: ImageGenerationService + ?Sized> ImageGenerationServiceExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenStudioError;
    use crate::image::types::GeneratedImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedService {
        calls: AtomicU32,
        fail_first: u32,
        error: fn() -> GenStudioError,
    }

    impl ScriptedService {
        fn new(fail_first: u32, error: fn() -> GenStudioError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                error,
            }
        }

        fn respond(&self, url: &str) -> GenerationResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                GenerationResult::failed(&(self.error)())
            } else {
                GenerationResult::succeeded(vec![GeneratedImage::new(url, "image/png")], None)
            }
        }
    }

    #[async_trait]
    impl ImageGenerationService for ScriptedService {
        async fn text_to_image(&self, _request: &GenerationRequest) -> GenerationResult {
            self.respond("text")
        }

        async fn image_to_image(&self, _request: &GenerationRequest) -> GenerationResult {
            self.respond("edit")
        }

        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Fal
        }
    }

    #[tokio::test]
    async fn test_generate_dispatches_on_references() {
        let service = ScriptedService::new(0, || GenStudioError::NoImageProduced);

        let text = service.generate(&GenerationRequest::new("a cat")).await;
        assert_eq!(text.images()[0].source_url(), "text");

        let edit = service
            .generate(&GenerationRequest::new("a cat").with_reference_image("https://x/y.png"))
            .await;
        assert_eq!(edit.images()[0].source_url(), "edit");
    }

    #[tokio::test]
    async fn test_no_retry_on_permanent_error() {
        let service = ScriptedService::new(1, || GenStudioError::InvalidCredential("bad".into()));
        let result = service
            .generate_with_retries(&GenerationRequest::new("a cat"), 3)
            .await;
        assert!(!result.success());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_error() {
        let service = ScriptedService::new(2, || GenStudioError::Network("reset".into()));
        let result = service
            .generate_with_retries(&GenerationRequest::new("a cat"), 3)
            .await;
        assert!(result.success());
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_suggested_delay() {
        let service = ScriptedService::new(1, || GenStudioError::Api {
            status: 429,
            message: "rate limited".into(),
        });
        let started = tokio::time::Instant::now();
        let result = service
            .generate_with_retries(&GenerationRequest::new("a cat"), 2)
            .await;
        assert!(result.success());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }

    #[test]
    fn test_default_names() {
        let service = ScriptedService::new(0, || GenStudioError::NoImageProduced);
        assert_eq!(service.name(), "fal.ai");
    }
}
