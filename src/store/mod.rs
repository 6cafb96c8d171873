//! Local persistence: gallery, presets and provider settings.

mod document;
pub mod gallery;
pub mod presets;
pub mod settings;

pub use gallery::{GalleryImage, GalleryStore, NewGalleryImage, SortField, SortOrder};
pub use presets::{PresetStore, PresetUpdate, PromptPreset, BUILTIN_PRESETS};
pub use settings::SettingsStore;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a store's state. A panic in another holder does not corrupt the
/// collection, so a poisoned lock is recovered.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
