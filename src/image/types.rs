//! Core types for image generation.

use crate::error::{ErrorKind, GenStudioError, Result};
use crate::id::mint_id;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Fewest images a single request may ask for.
pub const MIN_NUM_IMAGES: u8 = 1;

/// Most images a single request may ask for.
pub const MAX_NUM_IMAGES: u8 = 4;

/// Most reference images an image-to-image request may carry.
pub const MAX_REFERENCE_IMAGES: usize = 14;

/// Clamps any integer into `[MIN_NUM_IMAGES, MAX_NUM_IMAGES]`.
pub fn clamp_num_images(value: i64) -> u8 {
    value.clamp(i64::from(MIN_NUM_IMAGES), i64::from(MAX_NUM_IMAGES)) as u8
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG format (lossless).
    #[default]
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format (modern, efficient).
    WebP,
}

impl OutputFormat {
    /// Returns the wire name (`png`, `jpeg`, `webp`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::WebP => "webp",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Attempts to detect format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }
}

/// Output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    /// ~1024px on the long edge.
    #[default]
    #[serde(rename = "1K")]
    OneK,
    /// ~2048px on the long edge.
    #[serde(rename = "2K")]
    TwoK,
    /// ~4096px on the long edge.
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    /// Returns the wire name (`1K`, `2K`, `4K`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

/// Aspect ratios accepted by the providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 1:1 square.
    #[serde(rename = "1:1")]
    Square,
    /// 2:3 portrait.
    #[serde(rename = "2:3")]
    TwoThree,
    /// 3:2 landscape.
    #[serde(rename = "3:2")]
    ThreeTwo,
    /// 3:4 portrait.
    #[serde(rename = "3:4")]
    StandardPortrait,
    /// 4:3 landscape.
    #[serde(rename = "4:3")]
    Standard,
    /// 4:5 portrait.
    #[serde(rename = "4:5")]
    FourFive,
    /// 5:4 landscape.
    #[serde(rename = "5:4")]
    FiveFour,
    /// 9:16 tall portrait.
    #[serde(rename = "9:16")]
    Portrait,
    /// 16:9 widescreen.
    #[serde(rename = "16:9")]
    Landscape,
    /// 21:9 ultrawide.
    #[serde(rename = "21:9")]
    Ultrawide,
    /// Let the provider follow the reference image.
    #[serde(rename = "auto")]
    Auto,
}

impl AspectRatio {
    /// Returns the aspect ratio as a string (e.g., "16:9").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::TwoThree => "2:3",
            Self::ThreeTwo => "3:2",
            Self::StandardPortrait => "3:4",
            Self::Standard => "4:3",
            Self::FourFive => "4:5",
            Self::FiveFour => "5:4",
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
            Self::Ultrawide => "21:9",
            Self::Auto => "auto",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-independent model tier. Each adapter maps it to its own model id.
///
/// Requests that leave the tier unset are served by the default, `Base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelTier {
    /// Fast, economical model.
    #[default]
    #[serde(rename = "nano-banana")]
    Base,
    /// Highest-quality model.
    #[serde(rename = "nano-banana-pro")]
    Pro,
}

impl ModelTier {
    /// Returns the persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "nano-banana",
            Self::Pro => "nano-banana-pro",
        }
    }
}

/// A normalized request to generate images.
///
/// An empty `reference_images` list means text-to-image; otherwise the
/// request is image-to-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// The text prompt describing the desired image.
    pub prompt: String,
    /// What the image should avoid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Number of images, in `[1, 4]`.
    pub num_images: u8,
    /// Aspect ratio; adapters pick a default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    /// Output resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Desired output format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    /// Seed for deterministic generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Model tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelTier>,
    /// Reference images: remote URLs or `data:` URIs.
    #[serde(default)]
    pub reference_images: Vec<String>,
}

impl GenerationRequest {
    /// Creates a text-to-image request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            num_images: MIN_NUM_IMAGES,
            aspect_ratio: None,
            resolution: None,
            output_format: None,
            seed: None,
            model: None,
            reference_images: Vec::new(),
        }
    }

    /// Sets the negative prompt.
    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    /// Sets the image count, clamped into `[1, 4]`.
    pub fn with_num_images(mut self, count: i64) -> Self {
        self.num_images = clamp_num_images(count);
        self
    }

    /// Sets the aspect ratio.
    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }

    /// Sets the resolution.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Sets the desired output format.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    /// Sets the seed for deterministic generation.
    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the model tier.
    pub fn with_model(mut self, model: ModelTier) -> Self {
        self.model = Some(model);
        self
    }

    /// Appends a reference image. Ignored once 14 are present.
    pub fn with_reference_image(mut self, image: impl Into<String>) -> Self {
        if self.reference_images.len() < MAX_REFERENCE_IMAGES {
            self.reference_images.push(image.into());
        }
        self
    }

    /// Returns true if this request carries reference images.
    pub fn is_image_to_image(&self) -> bool {
        !self.reference_images.is_empty()
    }

    /// Checks the invariants adapters rely on.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GenStudioError::InvalidRequest("prompt is empty".into()));
        }
        if !(MIN_NUM_IMAGES..=MAX_NUM_IMAGES).contains(&self.num_images) {
            return Err(GenStudioError::InvalidRequest(format!(
                "num_images must be between {MIN_NUM_IMAGES} and {MAX_NUM_IMAGES}, got {}",
                self.num_images
            )));
        }
        if self.reference_images.len() > MAX_REFERENCE_IMAGES {
            return Err(GenStudioError::InvalidRequest(format!(
                "at most {MAX_REFERENCE_IMAGES} reference images are supported"
            )));
        }
        Ok(())
    }
}

/// A parsed `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUri<'a> {
    /// MIME type, e.g. `image/png`.
    pub mime_type: &'a str,
    /// Base64 payload, not decoded.
    pub data: &'a str,
}

impl<'a> DataUri<'a> {
    /// Parses a base64 data URI. Returns `None` for anything else.
    pub fn parse(uri: &'a str) -> Option<Self> {
        let rest = uri.strip_prefix("data:")?;
        let (mime_type, data) = rest.split_once(";base64,")?;
        if mime_type.is_empty() || mime_type.contains(';') || data.is_empty() {
            return None;
        }
        Some(Self { mime_type, data })
    }

    /// Builds a data URI string.
    pub fn encode(mime_type: &str, data: &str) -> String {
        format!("data:{mime_type};base64,{data}")
    }

    /// Decodes the payload.
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.trim())
            .map_err(|e| GenStudioError::Decode(e.to_string()))
    }
}

/// One produced image.
///
/// Created once per produced image. Only the local path can change after
/// creation, once the image has been saved to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    id: String,
    #[serde(rename = "url")]
    source_url: String,
    content_type: String,
    file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_path: Option<PathBuf>,
}

impl GeneratedImage {
    /// Creates an image with a fresh id and a file name derived from the content type.
    pub fn new(source_url: impl Into<String>, content_type: impl Into<String>) -> Self {
        let id = mint_id("img");
        let content_type = content_type.into();
        let extension = content_type
            .split('/')
            .nth(1)
            .map(|sub| sub.split(['+', ';']).next().unwrap_or(sub).trim())
            .filter(|ext| !ext.is_empty())
            .unwrap_or("png");
        let file_name = format!("{id}.{extension}");
        Self {
            id,
            source_url: source_url.into(),
            content_type,
            file_name,
            width: None,
            height: None,
            local_path: None,
        }
    }

    /// Sets the pixel dimensions reported by the provider.
    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote URL or embedded data URI.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// MIME type.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// File name derived from id and content type.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Width in pixels, if reported.
    pub fn width(&self) -> Option<u32> {
        self.width
    }

    /// Height in pixels, if reported.
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Where the image was saved, if it has been.
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Records where the image was saved.
    pub fn set_local_path(&mut self, path: impl Into<PathBuf>) {
        self.local_path = Some(path.into());
    }

    /// Returns true if the image is embedded as a data URI.
    pub fn is_embedded(&self) -> bool {
        DataUri::parse(&self.source_url).is_some()
    }

    /// Fetches the image bytes, decoding data URIs locally.
    pub async fn bytes(&self, client: &reqwest::Client) -> Result<Vec<u8>> {
        if let Some(uri) = DataUri::parse(&self.source_url) {
            return uri.decode();
        }

        let response = client
            .get(&self.source_url)
            .send()
            .await
            .map_err(|e| GenStudioError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenStudioError::Api {
                status: status.as_u16(),
                message: "Failed to download image".into(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenStudioError::Network(e.without_url().to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Saves the image into `dir` under its file name and records the path.
    pub async fn save_to_dir(
        &mut self,
        dir: impl AsRef<Path>,
        client: &reqwest::Client,
    ) -> Result<PathBuf> {
        let data = self.bytes(client).await?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &data)?;
        tracing::debug!(id = %self.id, path = %path.display(), size = data.len(), "saved generated image");
        self.local_path = Some(path.clone());
        Ok(path)
    }
}

/// Normalized outcome of one adapter call.
///
/// `success` is true exactly when `images` is non-empty, and `error` is set
/// exactly when `success` is false. The constructors enforce both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    success: bool,
    images: Vec<GeneratedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost: Option<f64>,
}

impl GenerationResult {
    /// A successful result. Zero images is reported as `NoImageProduced`.
    pub fn succeeded(images: Vec<GeneratedImage>, description: Option<String>) -> Self {
        if images.is_empty() {
            return Self::failed(&GenStudioError::NoImageProduced);
        }
        Self {
            success: true,
            images,
            description,
            error: None,
            error_kind: None,
            cost: None,
        }
    }

    /// A failed result carrying the error's message and kind.
    pub fn failed(error: &GenStudioError) -> Self {
        Self {
            success: false,
            images: Vec::new(),
            description: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            cost: None,
        }
    }

    /// A failed result with a caller-supplied message.
    pub fn failed_with_message(message: impl Into<String>) -> Self {
        Self {
            success: false,
            images: Vec::new(),
            description: None,
            error: Some(message.into()),
            error_kind: Some(ErrorKind::Unknown),
            cost: None,
        }
    }

    /// Attaches the provider-reported cost.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Whether images were produced.
    pub fn success(&self) -> bool {
        self.success
    }

    /// Produced images, empty on failure.
    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    /// Mutable access for attaching local paths.
    pub fn images_mut(&mut self) -> &mut [GeneratedImage] {
        &mut self.images
    }

    /// Consumes the result, returning its images.
    pub fn into_images(self) -> Vec<GeneratedImage> {
        self.images
    }

    /// Text the provider returned alongside the images.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// User-facing error message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Classified error kind.
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        self.error_kind.as_ref()
    }

    /// Provider-reported cost.
    pub fn cost(&self) -> Option<f64> {
        self.cost
    }
}

impl From<GenStudioError> for GenerationResult {
    fn from(err: GenStudioError) -> Self {
        Self::failed(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_num_images() {
        assert_eq!(clamp_num_images(0), 1);
        assert_eq!(clamp_num_images(-3), 1);
        assert_eq!(clamp_num_images(3), 3);
        assert_eq!(clamp_num_images(9), 4);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(OutputFormat::from_extension("png"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_extension("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_extension("webp"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::from_extension("gif"), None);
    }

    #[test]
    fn test_aspect_ratio_serde() {
        assert_eq!(
            serde_json::to_value(AspectRatio::Landscape).unwrap(),
            "16:9"
        );
        let ratio: AspectRatio = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(ratio, AspectRatio::Auto);
        assert_eq!(AspectRatio::FourFive.to_string(), "4:5");
    }

    #[test]
    fn test_model_tier_serde() {
        assert_eq!(
            serde_json::to_value(ModelTier::Pro).unwrap(),
            "nano-banana-pro"
        );
        assert_eq!(ModelTier::default(), ModelTier::Base);
    }

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new("A sunset")
            .with_num_images(12)
            .with_seed(7)
            .with_reference_image("https://example.com/a.png");
        assert_eq!(req.num_images, 4);
        assert_eq!(req.seed, Some(7));
        assert!(req.is_image_to_image());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_reference_cap() {
        let mut req = GenerationRequest::new("collage");
        for i in 0..20 {
            req = req.with_reference_image(format!("https://example.com/{i}.png"));
        }
        assert_eq!(req.reference_images.len(), MAX_REFERENCE_IMAGES);
        assert_eq!(req.reference_images[13], "https://example.com/13.png");
    }

    #[test]
    fn test_request_validate_empty_prompt() {
        let req = GenerationRequest::new("   ");
        assert!(matches!(
            req.validate(),
            Err(GenStudioError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_data_uri_parse() {
        let uri = DataUri::parse("data:image/jpeg;base64,/9j/4AAQ").unwrap();
        assert_eq!(uri.mime_type, "image/jpeg");
        assert_eq!(uri.data, "/9j/4AAQ");

        assert!(DataUri::parse("https://example.com/a.png").is_none());
        assert!(DataUri::parse("data:image/png,rawbytes").is_none());
        assert!(DataUri::parse("data:;base64,AAAA").is_none());
        assert!(DataUri::parse("data:image/png;base64,").is_none());
    }

    #[test]
    fn test_data_uri_decode() {
        let uri = DataUri::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        let bytes = uri.decode().unwrap();
        assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn test_generated_image_file_name() {
        let image = GeneratedImage::new("https://fal.media/x.jpg", "image/jpeg");
        assert!(image.id().starts_with("img_"));
        assert_eq!(image.file_name(), format!("{}.jpeg", image.id()));

        let image = GeneratedImage::new("https://fal.media/x", "");
        assert!(image.file_name().ends_with(".png"));

        let image = GeneratedImage::new("https://fal.media/x", "image/svg+xml");
        assert!(image.file_name().ends_with(".svg"));
    }

    #[test]
    fn test_generated_image_ids_unique() {
        let a = GeneratedImage::new("u", "image/png");
        let b = GeneratedImage::new("u", "image/png");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_result_invariant() {
        let ok = GenerationResult::succeeded(vec![GeneratedImage::new("u", "image/png")], None);
        assert!(ok.success());
        assert!(!ok.images().is_empty());
        assert!(ok.error().is_none());

        let empty = GenerationResult::succeeded(Vec::new(), Some("only text".into()));
        assert!(!empty.success());
        assert!(empty.images().is_empty());
        assert!(empty.error().is_some());
        assert_eq!(empty.error_kind(), Some(&ErrorKind::NoImageProduced));

        let failed = GenerationResult::failed(&GenStudioError::Timeout(
            std::time::Duration::from_secs(1),
        ));
        assert!(!failed.success());
        assert!(failed.error().is_some());
        assert_eq!(failed.error_kind(), Some(&ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_save_embedded_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = GeneratedImage::new("data:image/png;base64,iVBORw0KGgo=", "image/png");
        let client = reqwest::Client::new();

        let path = image.save_to_dir(dir.path(), &client).await.unwrap();

        assert_eq!(path, dir.path().join(image.file_name()));
        assert_eq!(image.local_path(), Some(path.as_path()));
        assert_eq!(std::fs::read(&path).unwrap().len(), 8);
    }
}
