//! fal.ai image generation provider.
//!
//! Also serves custom endpoints that speak the fal protocol.

use crate::config::{ProviderConfig, ProviderKind, DEFAULT_TIMEOUT_MS, FAL_DEFAULT_BASE_URL};
use crate::error::{sanitize_error_message, GenStudioError, Result};
use crate::image::provider::ImageGenerationService;
use crate::image::providers::build_http_client;
use crate::image::types::{
    AspectRatio, GeneratedImage, GenerationRequest, GenerationResult, ModelTier, OutputFormat,
    Resolution,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// fal.ai model paths for each tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FalImageModel {
    /// Nano Banana (default).
    #[default]
    NanoBanana,
    /// Nano Banana Pro.
    NanoBananaPro,
}

impl FalImageModel {
    /// Maps a tier onto a model. Unset means [`ModelTier::default`].
    pub fn from_tier(tier: Option<ModelTier>) -> Self {
        match tier.unwrap_or_default() {
            ModelTier::Base => Self::NanoBanana,
            ModelTier::Pro => Self::NanoBananaPro,
        }
    }

    /// Returns the text-to-image model path.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBanana => "fal-ai/nano-banana",
            Self::NanoBananaPro => "fal-ai/nano-banana-pro",
        }
    }

    /// Returns the image-to-image model path.
    pub fn edit_path(&self) -> &'static str {
        match self {
            Self::NanoBanana => "fal-ai/nano-banana/edit",
            Self::NanoBananaPro => "fal-ai/nano-banana-pro/edit",
        }
    }

    /// fal.ai list price in USD for one produced image.
    pub fn price_per_image(&self, resolution: Resolution) -> f64 {
        match (self, resolution) {
            (Self::NanoBanana, _) => 0.039,
            (Self::NanoBananaPro, Resolution::FourK) => 0.30,
            (Self::NanoBananaPro, _) => 0.15,
        }
    }
}

/// Builder for [`FalImageService`].
#[derive(Debug, Clone)]
pub struct FalImageServiceBuilder {
    kind: ProviderKind,
    api_key: Option<String>,
    base_url: Option<String>,
    proxy: Option<String>,
    timeout: Duration,
}

impl Default for FalImageServiceBuilder {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Fal,
            api_key: None,
            base_url: None,
            proxy: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl FalImageServiceBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `FAL_KEY` env var for the fal provider.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the endpoint. Defaults to `https://fal.run`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Routes requests through an HTTP(S) proxy.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the service as a custom fal-compatible endpoint.
    pub fn custom(mut self) -> Self {
        self.kind = ProviderKind::Custom;
        self
    }

    /// Builds the service.
    ///
    /// A missing key does not fail here; it is reported on the first call.
    /// Fails if the proxy URL is invalid or a custom endpoint has no base URL.
    pub fn build(self) -> Result<FalImageService> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.kind
                    .api_key_env_var()
                    .and_then(|var| std::env::var(var).ok())
            })
            .unwrap_or_default();

        let base_url = match (self.base_url, self.kind) {
            (Some(url), _) if !url.trim().is_empty() => url,
            (_, ProviderKind::Custom) => {
                return Err(GenStudioError::InvalidRequest(
                    "custom provider requires a base URL".into(),
                ))
            }
            _ => FAL_DEFAULT_BASE_URL.to_string(),
        };

        Ok(FalImageService {
            client: build_http_client(self.timeout, self.proxy.as_deref())?,
            kind: self.kind,
            api_key,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout: self.timeout,
        })
    }
}

/// fal.ai image generation service.
///
/// Uses the synchronous `fal.run` endpoint with `sync_mode`, so one POST
/// returns the finished images.
pub struct FalImageService {
    client: reqwest::Client,
    kind: ProviderKind,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl FalImageService {
    /// Creates a new [`FalImageServiceBuilder`].
    pub fn builder() -> FalImageServiceBuilder {
        FalImageServiceBuilder::new()
    }

    /// Builds a service from a stored provider config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .api_key(config.api_key.clone())
            .timeout(config.timeout());
        if config.provider == ProviderKind::Custom {
            builder = builder.custom();
        }
        if let Some(url) = config.effective_base_url() {
            builder = builder.base_url(url);
        }
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(proxy);
        }
        builder.build()
    }

    fn parse_error(&self, status: u16, text: &str) -> GenStudioError {
        let message = serde_json::from_str::<FalErrorResponse>(text)
            .ok()
            .and_then(|resp| resp.message())
            .map(|msg| sanitize_error_message(&msg))
            .unwrap_or_else(|| format!("API error: {status}"));

        if status == 401 || status == 403 {
            return GenStudioError::InvalidCredential(message);
        }

        GenStudioError::Api { status, message }
    }

    async fn post(&self, model_path: &str, body: &FalImageRequest) -> Result<FalResponse> {
        let api_key = self.kind.require_api_key(&self.api_key)?;
        let url = format!("{}/{}", self.base_url, model_path);

        tracing::debug!(
            provider = %self.kind,
            model = model_path,
            num_images = body.num_images,
            "submitting fal image request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {api_key}"))
            .json(body)
            .send()
            .await
            .map_err(|e| GenStudioError::from_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &text));
        }

        response
            .json::<FalResponse>()
            .await
            .map_err(|e| GenStudioError::from_transport(e, self.timeout))
    }

    async fn generate_impl(
        &self,
        request: &GenerationRequest,
        edit: bool,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let model = FalImageModel::from_tier(request.model);
        let (path, body) = if edit {
            (model.edit_path(), FalImageRequest::edit(request))
        } else {
            (model.as_str(), FalImageRequest::text(request))
        };

        let start = Instant::now();
        let response = self.post(path, &body).await?;

        let images: Vec<GeneratedImage> = response
            .images
            .into_iter()
            .map(|img| {
                let content_type = img
                    .content_type
                    .unwrap_or_else(|| body.output_format.mime_type().to_string());
                GeneratedImage::new(img.url, content_type).with_dimensions(img.width, img.height)
            })
            .collect();

        if images.is_empty() {
            return Err(GenStudioError::NoImageProduced);
        }

        tracing::debug!(
            provider = %self.kind,
            model = path,
            count = images.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fal image generation complete"
        );

        let count = images.len() as f64;
        let result = GenerationResult::succeeded(images, response.description);
        // Custom endpoints bill on their own terms.
        Ok(match self.kind {
            ProviderKind::Fal => result.with_cost(model.price_per_image(body.resolution) * count),
            _ => result,
        })
    }

    async fn run(&self, request: &GenerationRequest, edit: bool) -> GenerationResult {
        match self.generate_impl(request, edit).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(provider = %self.kind, edit, error = %err, "fal image generation failed");
                GenerationResult::failed(&err)
            }
        }
    }
}

#[async_trait]
impl ImageGenerationService for FalImageService {
    async fn text_to_image(&self, request: &GenerationRequest) -> GenerationResult {
        self.run(request, false).await
    }

    async fn image_to_image(&self, request: &GenerationRequest) -> GenerationResult {
        self.run(request, true).await
    }

    async fn test_connection(&self) -> Result<bool> {
        let api_key = self.kind.require_api_key(&self.api_key)?;
        let url = format!("{}/health", self.base_url);

        match self
            .client
            .get(&url)
            .header("Authorization", format!("Key {api_key}"))
            .send()
            .await
        {
            Ok(response) => match response.status().as_u16() {
                401 | 403 => Err(GenStudioError::InvalidCredential(
                    "API key rejected by provider".into(),
                )),
                status => {
                    tracing::debug!(provider = %self.kind, status, "fal connection check");
                    Ok(true)
                }
            },
            Err(err) => {
                // Unreachable endpoint says nothing about the key.
                tracing::debug!(provider = %self.kind, error = %err.without_url(), "fal connection check inconclusive");
                Ok(true)
            }
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

// -- Request types --

#[derive(Debug, Serialize)]
struct FalImageRequest {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_urls: Option<Vec<String>>,
    num_images: u8,
    aspect_ratio: AspectRatio,
    resolution: Resolution,
    output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    sync_mode: bool,
}

impl FalImageRequest {
    fn text(req: &GenerationRequest) -> Self {
        Self {
            prompt: req.prompt.clone(),
            negative_prompt: req
                .negative_prompt
                .clone()
                .filter(|neg| !neg.trim().is_empty()),
            image_urls: None,
            num_images: req.num_images.max(1),
            aspect_ratio: req.aspect_ratio.unwrap_or(AspectRatio::Square),
            resolution: req.resolution.unwrap_or_default(),
            output_format: req.output_format.unwrap_or_default(),
            seed: req.seed,
            sync_mode: true,
        }
    }

    fn edit(req: &GenerationRequest) -> Self {
        Self {
            prompt: req.prompt.clone(),
            negative_prompt: None,
            image_urls: Some(req.reference_images.clone()),
            num_images: req.num_images.max(1),
            aspect_ratio: req.aspect_ratio.unwrap_or(AspectRatio::Auto),
            resolution: req.resolution.unwrap_or_default(),
            output_format: req.output_format.unwrap_or_default(),
            seed: None,
            sync_mode: true,
        }
    }
}

// -- Response types --

#[derive(Debug, Deserialize)]
struct FalResponse {
    #[serde(default)]
    images: Vec<FalImageInfo>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalImageInfo {
    url: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// `detail` is a string for most errors and a list of
/// `{loc, msg, type}` objects for validation errors.
#[derive(Debug, Deserialize)]
struct FalErrorResponse {
    detail: serde_json::Value,
}

impl FalErrorResponse {
    fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => items
                .first()
                .and_then(|item| item.get("msg"))
                .and_then(|msg| msg.as_str())
                .map(str::to_string),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn service() -> FalImageService {
        FalImageServiceBuilder::new()
            .api_key("test-key")
            .build()
            .unwrap()
    }

    #[test]
    fn test_model_mapping_is_total() {
        assert_eq!(FalImageModel::from_tier(None), FalImageModel::NanoBanana);
        assert_eq!(
            FalImageModel::from_tier(None),
            FalImageModel::from_tier(Some(ModelTier::default()))
        );
        assert_eq!(
            FalImageModel::from_tier(Some(ModelTier::Base)).as_str(),
            "fal-ai/nano-banana"
        );
        assert_eq!(
            FalImageModel::from_tier(Some(ModelTier::Pro)).as_str(),
            "fal-ai/nano-banana-pro"
        );
        assert_eq!(
            FalImageModel::NanoBananaPro.edit_path(),
            "fal-ai/nano-banana-pro/edit"
        );
    }

    #[test]
    fn test_price_per_image() {
        assert_eq!(FalImageModel::NanoBanana.price_per_image(Resolution::OneK), 0.039);
        assert_eq!(FalImageModel::NanoBananaPro.price_per_image(Resolution::TwoK), 0.15);
        assert_eq!(FalImageModel::NanoBananaPro.price_per_image(Resolution::FourK), 0.30);
    }

    #[test]
    fn test_builder_defaults() {
        let service = service();
        assert_eq!(service.base_url, FAL_DEFAULT_BASE_URL);
        assert_eq!(service.kind, ProviderKind::Fal);
        assert_eq!(service.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }

    #[test]
    fn test_builder_trims_base_url() {
        let service = FalImageServiceBuilder::new()
            .api_key("k")
            .base_url("https://my.host/fal/")
            .build()
            .unwrap();
        assert_eq!(service.base_url, "https://my.host/fal");
    }

    #[test]
    fn test_custom_requires_base_url() {
        let result = FalImageServiceBuilder::new().api_key("k").custom().build();
        assert!(matches!(result, Err(GenStudioError::InvalidRequest(_))));
    }

    #[test]
    fn test_builder_rejects_bad_proxy() {
        let result = FalImageServiceBuilder::new()
            .api_key("k")
            .proxy("http://[::1")
            .build();
        assert!(matches!(result, Err(GenStudioError::InvalidRequest(_))));
    }

    #[test]
    fn test_from_config() {
        let config = ProviderConfig::new(ProviderKind::Custom, "k")
            .with_base_url("http://localhost:9000")
            .with_timeout_ms(1500);
        let service = FalImageService::from_config(&config).unwrap();
        assert_eq!(service.kind(), ProviderKind::Custom);
        assert_eq!(service.base_url, "http://localhost:9000");
        assert_eq!(service.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_text_request_defaults() {
        let req = GenerationRequest::new("A sunset");
        let json = serde_json::to_value(FalImageRequest::text(&req)).unwrap();

        assert_eq!(json["prompt"], "A sunset");
        assert_eq!(json["num_images"], 1);
        assert_eq!(json["aspect_ratio"], "1:1");
        assert_eq!(json["resolution"], "1K");
        assert_eq!(json["output_format"], "png");
        assert_eq!(json["sync_mode"], true);
        assert!(json.get("seed").is_none());
        assert!(json.get("negative_prompt").is_none());
        assert!(json.get("image_urls").is_none());
    }

    #[test]
    fn test_text_request_full() {
        let req = GenerationRequest::new("A sunset")
            .with_negative_prompt("blurry")
            .with_num_images(3)
            .with_aspect_ratio(AspectRatio::Landscape)
            .with_resolution(Resolution::FourK)
            .with_output_format(OutputFormat::WebP)
            .with_seed(42);
        let json = serde_json::to_value(FalImageRequest::text(&req)).unwrap();

        assert_eq!(json["negative_prompt"], "blurry");
        assert_eq!(json["num_images"], 3);
        assert_eq!(json["aspect_ratio"], "16:9");
        assert_eq!(json["resolution"], "4K");
        assert_eq!(json["output_format"], "webp");
        assert_eq!(json["seed"], 42);
    }

    #[test]
    fn test_edit_request_defaults() {
        let req = GenerationRequest::new("Make it night")
            .with_seed(1)
            .with_reference_image("https://example.com/a.png")
            .with_reference_image("data:image/png;base64,AAAA");
        let json = serde_json::to_value(FalImageRequest::edit(&req)).unwrap();

        assert_eq!(json["aspect_ratio"], "auto");
        assert_eq!(
            json["image_urls"],
            serde_json::json!(["https://example.com/a.png", "data:image/png;base64,AAAA"])
        );
        assert!(json.get("seed").is_none());
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "images": [
                {"url": "https://fal.media/files/a.png", "content_type": "image/png", "width": 1024, "height": 1024},
                {"url": "https://fal.media/files/b.jpeg"}
            ],
            "description": "Two cats"
        }"#;
        let resp: FalResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.images.len(), 2);
        assert_eq!(resp.images[0].width, Some(1024));
        assert!(resp.images[1].content_type.is_none());
        assert_eq!(resp.description.as_deref(), Some("Two cats"));
    }

    #[test]
    fn test_parse_error_auth() {
        let err = service().parse_error(401, r#"{"detail": "Unauthorized"}"#);
        assert!(matches!(err, GenStudioError::InvalidCredential(msg) if msg == "Unauthorized"));
    }

    #[test]
    fn test_parse_error_validation_detail() {
        let err = service().parse_error(
            422,
            r#"{"detail": [{"loc": ["body", "prompt"], "msg": "field required", "type": "value_error"}]}"#,
        );
        assert_eq!(
            err.kind(),
            ErrorKind::RemoteApiError {
                message: "field required".into(),
                status: 422
            }
        );
    }

    #[test]
    fn test_parse_error_non_json() {
        let err = service().parse_error(502, "<html>Bad Gateway</html>");
        assert!(matches!(
            err,
            GenStudioError::Api { status: 502, ref message } if message == "API error: 502"
        ));
    }

    #[tokio::test]
    async fn test_missing_key_never_hits_network() {
        let service = FalImageServiceBuilder::new()
            .api_key("")
            .custom()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();

        let result = service.text_to_image(&GenerationRequest::new("a cat")).await;
        assert!(!result.success());
        assert_eq!(result.error_kind(), Some(&ErrorKind::MissingCredential));

        let check = service.test_connection().await;
        assert!(matches!(check, Err(GenStudioError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn test_empty_prompt_fails_locally() {
        let result = service().text_to_image(&GenerationRequest::new("")).await;
        assert!(!result.success());
        assert_eq!(result.error_kind(), Some(&ErrorKind::Unknown));
    }
}
