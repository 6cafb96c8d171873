//! Gemini (Google) image generation provider.

use crate::config::{ProviderConfig, ProviderKind, DEFAULT_TIMEOUT_MS, GOOGLE_DEFAULT_BASE_URL};
use crate::error::{sanitize_error_message, GenStudioError, Result};
use crate::image::provider::ImageGenerationService;
use crate::image::providers::build_http_client;
use crate::image::types::{
    AspectRatio, DataUri, GeneratedImage, GenerationRequest, GenerationResult, ModelTier,
    Resolution,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Nano Banana - Gemini 2.5 Flash Image (fast, economical).
    #[default]
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    NanoBananaPro,
}

impl GeminiModel {
    /// Maps a tier onto a model. Unset means [`ModelTier::default`].
    pub fn from_tier(tier: Option<ModelTier>) -> Self {
        match tier.unwrap_or_default() {
            ModelTier::Base => Self::NanoBanana,
            ModelTier::Pro => Self::NanoBananaPro,
        }
    }

    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "gemini-3-pro-image-preview",
        }
    }

    /// List price in USD for one produced image.
    pub fn price_per_image(&self, resolution: Resolution) -> f64 {
        match (self, resolution) {
            (Self::NanoBanana, _) => 0.039,
            (Self::NanoBananaPro, Resolution::FourK) => 0.24,
            (Self::NanoBananaPro, _) => 0.134,
        }
    }
}

/// Builder for [`GeminiImageService`].
#[derive(Debug, Clone)]
pub struct GeminiImageServiceBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    proxy: Option<String>,
    timeout: Duration,
}

impl Default for GeminiImageServiceBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            proxy: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl GeminiImageServiceBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the endpoint. `/v1beta` is appended unless already present.
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

    /// Builds the service. A missing key is reported on the first call.
    pub fn build(self) -> Result<GeminiImageService> {
        self.build_with_env(|var| std::env::var(var).ok())
    }

    fn build_with_env(self, env: impl Fn(&str) -> Option<String>) -> Result<GeminiImageService> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| ProviderKind::Google.api_key_env_var().and_then(env))
            .unwrap_or_default();

        let base_url = self
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| GOOGLE_DEFAULT_BASE_URL.to_string());

        Ok(GeminiImageService {
            client: build_http_client(self.timeout, self.proxy.as_deref())?,
            api_key,
            base_url: normalize_base_url(&base_url),
            timeout: self.timeout,
        })
    }
}

/// Trims trailing slashes and makes sure the URL ends up under `/v1beta`.
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("/v1beta") {
        url.to_string()
    } else {
        format!("{url}/v1beta")
    }
}

/// Gemini image generation service.
pub struct GeminiImageService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiImageService {
    /// Creates a new [`GeminiImageServiceBuilder`].
    pub fn builder() -> GeminiImageServiceBuilder {
        GeminiImageServiceBuilder::new()
    }

    /// Builds a service from a stored provider config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .api_key(config.api_key.clone())
            .timeout(config.timeout());
        if let Some(url) = config.effective_base_url() {
            builder = builder.base_url(url);
        }
        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(proxy);
        }
        builder.build()
    }

    fn parse_error(&self, status: u16, text: &str) -> GenStudioError {
        let message = serde_json::from_str::<GeminiErrorEnvelope>(text)
            .ok()
            .map(|envelope| envelope.error.message)
            .filter(|msg| !msg.trim().is_empty())
            .map(|msg| sanitize_error_message(&msg))
            .unwrap_or_else(|| format!("API error: {status}"));

        // Google reports a malformed key as 400 INVALID_ARGUMENT.
        if status == 401 || status == 403 || text.contains("API_KEY_INVALID") {
            return GenStudioError::InvalidCredential(message);
        }

        GenStudioError::Api { status, message }
    }

    async fn generate_impl(
        &self,
        request: &GenerationRequest,
        edit: bool,
    ) -> Result<GenerationResult> {
        request.validate()?;
        let api_key = ProviderKind::Google.require_api_key(&self.api_key)?;
        let model = GeminiModel::from_tier(request.model);
        let body = if edit {
            GeminiRequest::edit(request)
        } else {
            GeminiRequest::text(request)
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model.as_str());
        tracing::debug!(
            provider = %ProviderKind::Google,
            model = model.as_str(),
            parts = body.contents[0].parts.len(),
            "submitting gemini image request"
        );

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| GenStudioError::from_transport(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &text));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GenStudioError::from_transport(e, self.timeout))?;

        let result = gemini_response.into_result(status.as_u16())?;
        let price = model.price_per_image(request.resolution.unwrap_or_default());
        let image_count = result.images().len();
        let result = result.with_cost(price * image_count as f64);

        tracing::debug!(
            provider = %ProviderKind::Google,
            model = model.as_str(),
            count = result.images().len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "gemini image generation complete"
        );

        Ok(result)
    }

    async fn run(&self, request: &GenerationRequest, edit: bool) -> GenerationResult {
        match self.generate_impl(request, edit).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(provider = %ProviderKind::Google, edit, error = %err, "gemini image generation failed");
                GenerationResult::failed(&err)
            }
        }
    }
}

#[async_trait]
impl ImageGenerationService for GeminiImageService {
    async fn text_to_image(&self, request: &GenerationRequest) -> GenerationResult {
        self.run(request, false).await
    }

    async fn image_to_image(&self, request: &GenerationRequest) -> GenerationResult {
        self.run(request, true).await
    }

    async fn test_connection(&self) -> Result<bool> {
        let api_key = ProviderKind::Google.require_api_key(&self.api_key)?;
        let url = format!("{}/models", self.base_url);

        let response = match self
            .client
            .get(&url)
            .query(&[("key", api_key)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err.without_url(), "gemini connection check inconclusive");
                return Ok(true);
            }
        };

        let status = response.status().as_u16();
        match status {
            401 | 403 => Err(GenStudioError::InvalidCredential(
                "API key rejected by provider".into(),
            )),
            400 => {
                let text = response.text().await.unwrap_or_default();
                match self.parse_error(status, &text) {
                    err @ GenStudioError::InvalidCredential(_) => Err(err),
                    _ => Ok(true),
                }
            }
            _ => {
                tracing::debug!(status, "gemini connection check");
                Ok(true)
            }
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<GeminiImageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<&'static str>,
    image_size: &'static str,
}

impl GeminiRequest {
    fn text(req: &GenerationRequest) -> Self {
        let parts = vec![GeminiRequestPart::Text {
            text: req.prompt.clone(),
        }];
        Self::with_parts(parts, req, false)
    }

    fn edit(req: &GenerationRequest) -> Self {
        let mut parts: Vec<GeminiRequestPart> = req
            .reference_images
            .iter()
            .enumerate()
            .filter_map(|(index, reference)| match DataUri::parse(reference) {
                Some(uri) => Some(GeminiRequestPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: uri.mime_type.to_string(),
                        data: uri.data.to_string(),
                    },
                }),
                None => {
                    tracing::warn!(
                        index,
                        "skipping reference image: gemini only accepts base64 data URIs"
                    );
                    None
                }
            })
            .collect();

        parts.push(GeminiRequestPart::Text {
            text: req.prompt.clone(),
        });

        Self::with_parts(parts, req, true)
    }

    /// Text-to-image sends `imageConfig` when the caller picked a ratio or
    /// size, defaulting the ratio to `1:1`. Edits keep the reference's framing
    /// and only send it for an explicit ratio. Gemini has no `auto` ratio, so
    /// it is omitted and the model decides.
    fn with_parts(parts: Vec<GeminiRequestPart>, req: &GenerationRequest, edit: bool) -> Self {
        let explicit_ratio = req.aspect_ratio.filter(|ratio| *ratio != AspectRatio::Auto);
        let wanted = if edit {
            explicit_ratio.is_some()
        } else {
            req.aspect_ratio.is_some() || req.resolution.is_some()
        };
        let image_config = wanted.then(|| GeminiImageConfig {
            aspect_ratio: if edit {
                explicit_ratio.map(|ratio| ratio.as_str())
            } else {
                Some(req.aspect_ratio.unwrap_or(AspectRatio::Square))
                    .filter(|ratio| *ratio != AspectRatio::Auto)
                    .map(|ratio| ratio.as_str())
            },
            image_size: req.resolution.unwrap_or_default().as_str(),
        });

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
                image_config,
                seed: req.seed,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    error: Option<GeminiApiError>,
    #[serde(default, alias = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default, alias = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, alias = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiApiError,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "IMAGE_PROHIBITED_CONTENT",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
];

impl GeminiResponse {
    /// Collects every inline image across all candidates as data URIs.
    fn into_result(self, status: u16) -> Result<GenerationResult> {
        if let Some(error) = self.error {
            return Err(GenStudioError::Api {
                status: error.code.unwrap_or(status),
                message: sanitize_error_message(&error.message),
            });
        }

        let mut images = Vec::new();
        let mut texts = Vec::new();
        let mut blocked = None;

        for candidate in self.candidates {
            if let Some(reason) = candidate
                .finish_reason
                .filter(|r| SAFETY_FINISH_REASONS.contains(&r.as_str()))
            {
                blocked = Some(reason);
            }
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    let url = DataUri::encode(&inline.mime_type, &inline.data);
                    images.push(GeneratedImage::new(url, inline.mime_type));
                } else if let Some(text) = part.text.filter(|t| !t.trim().is_empty()) {
                    texts.push(text);
                }
            }
        }

        if images.is_empty() {
            let reason = self
                .prompt_feedback
                .and_then(|feedback| feedback.block_reason)
                .or(blocked);
            if let Some(reason) = reason {
                return Err(GenStudioError::Api {
                    status,
                    message: format!("content blocked by safety filter: {reason}"),
                });
            }
            return Err(GenStudioError::NoImageProduced);
        }

        let description = (!texts.is_empty()).then(|| texts.join("\n"));
        Ok(GenerationResult::succeeded(images, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::types::Resolution;

    fn service() -> GeminiImageService {
        GeminiImageServiceBuilder::new()
            .api_key("test-key")
            .build()
            .unwrap()
    }

    #[test]
    fn test_gemini_model_mapping() {
        assert_eq!(GeminiModel::from_tier(None).as_str(), "gemini-2.5-flash-image");
        assert_eq!(
            GeminiModel::from_tier(Some(ModelTier::Base)),
            GeminiModel::NanoBanana
        );
        assert_eq!(
            GeminiModel::from_tier(Some(ModelTier::Pro)).as_str(),
            "gemini-3-pro-image-preview"
        );
        assert_eq!(
            GeminiModel::from_tier(None),
            GeminiModel::from_tier(Some(ModelTier::default()))
        );
    }

    #[test]
    fn test_price_per_image() {
        assert_eq!(GeminiModel::NanoBanana.price_per_image(Resolution::FourK), 0.039);
        assert_eq!(GeminiModel::NanoBananaPro.price_per_image(Resolution::TwoK), 0.134);
        assert_eq!(GeminiModel::NanoBananaPro.price_per_image(Resolution::FourK), 0.24);
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://generativelanguage.googleapis.com/"),
            "https://generativelanguage.googleapis.com/v1beta"
        );
        assert_eq!(
            normalize_base_url("https://proxy.example.com/v1beta//"),
            "https://proxy.example.com/v1beta"
        );
    }

    #[test]
    fn test_builder_default_base_url() {
        assert_eq!(
            service().base_url,
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }

    #[test]
    fn test_text_request_minimal() {
        let req = GenerationRequest::new("A puppy");
        let json = serde_json::to_value(GeminiRequest::text(&req)).unwrap();

        assert_eq!(json["contents"][0]["parts"][0]["text"], "A puppy");
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
        assert!(json["generationConfig"].get("imageConfig").is_none());
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_text_request_image_config_defaults() {
        let req = GenerationRequest::new("A puppy").with_resolution(Resolution::TwoK);
        let json = serde_json::to_value(GeminiRequest::text(&req)).unwrap();

        assert_eq!(
            json["generationConfig"]["imageConfig"],
            serde_json::json!({"aspectRatio": "1:1", "imageSize": "2K"})
        );

        let req = GenerationRequest::new("A puppy").with_aspect_ratio(AspectRatio::Portrait);
        let json = serde_json::to_value(GeminiRequest::text(&req)).unwrap();
        assert_eq!(
            json["generationConfig"]["imageConfig"],
            serde_json::json!({"aspectRatio": "9:16", "imageSize": "1K"})
        );
    }

    #[test]
    fn test_edit_request_inlines_data_uris() {
        let req = GenerationRequest::new("Make it night")
            .with_reference_image("data:image/jpeg;base64,/9j/4AAQ")
            .with_reference_image("https://example.com/skipped.png")
            .with_reference_image("data:image/png;base64,iVBORw0KGgo=");
        let gemini_req = GeminiRequest::edit(&req);
        let json = serde_json::to_value(&gemini_req).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[0]["inline_data"]["data"], "/9j/4AAQ");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[2]["text"], "Make it night");
    }

    #[test]
    fn test_edit_request_keeps_reference_framing() {
        let req = GenerationRequest::new("Edit")
            .with_aspect_ratio(AspectRatio::Auto)
            .with_resolution(Resolution::TwoK)
            .with_reference_image("data:image/png;base64,AAAA");
        let json = serde_json::to_value(GeminiRequest::edit(&req)).unwrap();
        assert!(json["generationConfig"].get("imageConfig").is_none());

        let req = GenerationRequest::new("Edit")
            .with_resolution(Resolution::OneK)
            .with_reference_image("data:image/png;base64,AAAA");
        let json = serde_json::to_value(GeminiRequest::edit(&req)).unwrap();
        assert!(json["generationConfig"].get("imageConfig").is_none());
    }

    #[test]
    fn test_edit_request_explicit_ratio() {
        let req = GenerationRequest::new("Edit")
            .with_aspect_ratio(AspectRatio::Landscape)
            .with_reference_image("data:image/png;base64,AAAA");
        let json = serde_json::to_value(GeminiRequest::edit(&req)).unwrap();
        assert_eq!(
            json["generationConfig"]["imageConfig"],
            serde_json::json!({"aspectRatio": "16:9", "imageSize": "1K"})
        );
    }

    #[test]
    fn test_response_collects_all_images() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here you go"},
                        {"inline_data": {"mime_type": "image/png", "data": "iVBORw0KGgo="}},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/4AAQ"}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let result = resp.into_result(200).unwrap();

        assert!(result.success());
        assert_eq!(result.images().len(), 2);
        assert_eq!(
            result.images()[0].source_url(),
            "data:image/png;base64,iVBORw0KGgo="
        );
        assert_eq!(result.images()[1].content_type(), "image/jpeg");
        assert!(result.images()[1].file_name().ends_with(".jpeg"));
        assert_eq!(result.description(), Some("Here you go"));
    }

    #[test]
    fn test_response_text_only_is_no_image() {
        let json = r#"{"candidates": [{"content": {"parts": [{"text": "I cannot draw that"}]}}]}"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_result(200).unwrap_err();
        assert!(matches!(err, GenStudioError::NoImageProduced));
    }

    #[test]
    fn test_response_error_field() {
        let json = r#"{"error": {"code": 429, "message": "Resource has been exhausted"}}"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_result(200).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::RemoteApiError {
                message: "Resource has been exhausted".into(),
                status: 429
            }
        );
    }

    #[test]
    fn test_response_prompt_blocked() {
        let json = r#"{"candidates": [], "promptFeedback": {"blockReason": "SAFETY"}}"#;
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_result(200).unwrap_err();
        assert!(matches!(err, GenStudioError::Api { ref message, .. } if message.contains("SAFETY")));
    }

    #[test]
    fn test_parse_error_invalid_key() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT", "details": [{"reason": "API_KEY_INVALID"}]}}"#;
        let err = service().parse_error(400, body);
        assert!(matches!(err, GenStudioError::InvalidCredential(_)));
    }

    #[test]
    fn test_parse_error_api() {
        let err = service().parse_error(500, r#"{"error": {"message": "Internal"}}"#);
        assert!(matches!(err, GenStudioError::Api { status: 500, ref message } if message == "Internal"));

        let err = service().parse_error(503, "");
        assert!(matches!(err, GenStudioError::Api { status: 503, ref message } if message == "API error: 503"));
    }

    #[test]
    fn test_builder_env_fallback() {
        let service = GeminiImageServiceBuilder::new()
            .build_with_env(|var| (var == "GOOGLE_API_KEY").then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(service.api_key, "from-env");

        let service = GeminiImageServiceBuilder::new()
            .api_key("explicit")
            .build_with_env(|_| Some("from-env".into()))
            .unwrap();
        assert_eq!(service.api_key, "explicit");
    }

    #[tokio::test]
    async fn test_missing_key_fails_locally() {
        let service = GeminiImageServiceBuilder::new()
            .api_key("")
            .base_url("http://127.0.0.1:9")
            .build_with_env(|_| None)
            .unwrap();

        let result = service.text_to_image(&GenerationRequest::new("a cat")).await;
        assert_eq!(result.error_kind(), Some(&ErrorKind::MissingCredential));
        assert_eq!(
            result.error(),
            Some("API key is not configured for google")
        );
    }
}
