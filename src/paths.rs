//! Locations of persisted state.

use crate::error::{GenStudioError, Result};
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable overriding the data root.
pub const DATA_DIR_ENV: &str = "GENSTUDIO_DATA_DIR";

const APP_DIR: &str = "genstudio";

/// Returns the data root: `$GENSTUDIO_DATA_DIR`, else the platform data dir
/// plus `genstudio`.
pub fn data_dir() -> Result<PathBuf> {
    resolve_data_dir(std::env::var_os(DATA_DIR_ENV))
}

fn resolve_data_dir(override_dir: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(GenStudioError::NoDataDir)
}

/// Provider settings document.
pub fn settings_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("settings.json"))
}

/// Gallery document.
pub fn gallery_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("gallery.json"))
}

/// Preset document.
pub fn presets_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("presets.json"))
}

/// Default directory for saved images.
pub fn images_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("images"))
}
