//! Image generation providers.

#[cfg(feature = "fal-image")]
mod fal;
#[cfg(feature = "gemini-image")]
mod gemini;

#[cfg(feature = "fal-image")]
pub use fal::{FalImageModel, FalImageService, FalImageServiceBuilder};

#[cfg(feature = "gemini-image")]
pub use gemini::{GeminiImageService, GeminiImageServiceBuilder, GeminiModel};

#[cfg(any(feature = "fal-image", feature = "gemini-image"))]
use crate::error::{GenStudioError, Result};

/// Builds the HTTP client an adapter uses: request timeout plus optional proxy.
#[cfg(any(feature = "fal-image", feature = "gemini-image"))]
pub(crate) fn build_http_client(
    timeout: std::time::Duration,
    proxy: Option<&str>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| GenStudioError::InvalidRequest(format!("invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| GenStudioError::Unknown(format!("failed to build HTTP client: {e}")))
}
