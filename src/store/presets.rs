//! Reusable prompt templates.

use crate::error::Result;
use crate::id::mint_id;
use crate::store::{document, lock};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A saved prompt with an optional negative prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPreset {
    /// Unique identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Prompt text.
    pub prompt: String,
    /// Negative prompt text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last modification, epoch milliseconds.
    pub updated_at: i64,
}

/// Partial update for [`PresetStore::update`]. `None` leaves a field alone;
/// `negative_prompt: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetUpdate {
    /// New name.
    pub name: Option<String>,
    /// New prompt.
    pub prompt: Option<String>,
    /// New negative prompt.
    pub negative_prompt: Option<Option<String>>,
}

/// Built-in presets as `(name, prompt, negative prompt)`.
pub const BUILTIN_PRESETS: [(&str, &str, &str); 9] = [
    (
        "Photo to figurine",
        "Turn the person or object in the image into a detailed collectible figurine, keeping its original shape and features, with smooth plastic surfaces and finely painted details",
        "blurry, low quality, deformed",
    ),
    (
        "Hyper-realistic portrait",
        "Generate a hyper-realistic photograph of the person, lifelike details, clear skin texture, natural lighting, 8K quality",
        "cartoon, anime, blurry, deformed",
    ),
    (
        "Short-video character still",
        "Create a dynamic image of the given person suited for short-form video, lively expression, composition framed for vertical screens",
        "static, expressionless, blurry",
    ),
    (
        "Architecture drawing to 3D model",
        "Convert the floor plan or architectural rendering into a 3D model style render, isometric view, clean structural lines, professional architectural visualization",
        "distorted, asymmetric, blurry",
    ),
    (
        "Multi-object composition with background",
        "Compose several elements into one edited image, blend the objects together and design a matching background while keeping a consistent overall style",
        "mismatched, visible seams, inconsistent colors",
    ),
    (
        "HD restoration",
        "Restore and enhance the image in high definition, raise the resolution, remove noise, recover detail and improve color",
        "blurry, oversharpened, distorted",
    ),
    (
        "Product lineup comparison",
        "Arrange several objects or products side by side for a version comparison or showcase, tidy layout, consistent lighting",
        "cluttered, inconsistent lighting",
    ),
    (
        "Product advertising shot",
        "Generate a high-quality product image for advertising, professional commercial photography, highlight the product's features, clean premium background",
        "low quality, amateur, cluttered background",
    ),
    (
        "Isolate and restore a person from a crowd",
        "Isolate the specified person from the crowd photo and reconstruct the blurry figure in high definition, preserving their features and expression",
        "distorted, deformed, misaligned facial features",
    ),
];

#[derive(Debug, Default)]
struct PresetState {
    presets: Vec<PromptPreset>,
    selected: Option<String>,
}

/// Prompt presets, persisted as a JSON array.
///
/// When nothing usable is on disk the built-in set is seeded and saved.
/// Mutations are written through; a failed write returns `Err` but the change
/// stays applied in memory until the next successful write.
#[derive(Debug)]
pub struct PresetStore {
    path: PathBuf,
    state: Mutex<PresetState>,
}

impl PresetStore {
    /// Opens the store at `path`, seeding defaults when the document is
    /// missing, empty or corrupt. If the seed cannot be written the store
    /// still opens and keeps the defaults in memory.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let presets = document::load::<Vec<PromptPreset>>(&path).filter(|p| !p.is_empty());
        let store = Self {
            path,
            state: Mutex::new(PresetState::default()),
        };

        match presets {
            Some(presets) => lock(&store.state).presets = presets,
            None => {
                tracing::debug!(path = %store.path.display(), "seeding built-in presets");
                let mut state = lock(&store.state);
                state.presets = builtin_presets();
                if let Err(err) = store.persist(&state) {
                    tracing::warn!(error = %err, "built-in presets kept in memory only");
                }
            }
        }
        store
    }

    /// Opens the store under the data root.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(crate::paths::presets_path()?))
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &PresetState) -> Result<()> {
        document::save(&self.path, &state.presets)
    }

    /// All presets in display order.
    pub fn presets(&self) -> Vec<PromptPreset> {
        lock(&self.state).presets.clone()
    }

    /// Looks up one preset.
    pub fn get(&self, id: &str) -> Option<PromptPreset> {
        lock(&self.state)
            .presets
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Looks up a preset by id, falling back to a case-insensitive name match.
    pub fn find(&self, key: &str) -> Option<PromptPreset> {
        let state = lock(&self.state);
        state
            .presets
            .iter()
            .find(|p| p.id == key)
            .or_else(|| {
                state
                    .presets
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(key.trim()))
            })
            .cloned()
    }

    /// Appends a preset.
    pub fn add(
        &self,
        name: impl Into<String>,
        prompt: impl Into<String>,
        negative_prompt: Option<String>,
    ) -> Result<PromptPreset> {
        let now = Utc::now().timestamp_millis();
        let preset = PromptPreset {
            id: mint_id("preset"),
            name: name.into(),
            prompt: prompt.into(),
            negative_prompt: negative_prompt.filter(|n| !n.trim().is_empty()),
            created_at: now,
            updated_at: now,
        };

        let mut state = lock(&self.state);
        state.presets.push(preset.clone());
        self.persist(&state)?;
        Ok(preset)
    }

    /// Applies a partial update. Returns `None` for an unknown id.
    pub fn update(&self, id: &str, update: PresetUpdate) -> Result<Option<PromptPreset>> {
        let mut state = lock(&self.state);
        let Some(preset) = state.presets.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };

        if let Some(name) = update.name {
            preset.name = name;
        }
        if let Some(prompt) = update.prompt {
            preset.prompt = prompt;
        }
        if let Some(negative) = update.negative_prompt {
            preset.negative_prompt = negative.filter(|n| !n.trim().is_empty());
        }
        preset.updated_at = Utc::now().timestamp_millis().max(preset.updated_at + 1);

        let updated = preset.clone();
        self.persist(&state)?;
        Ok(Some(updated))
    }

    /// Deletes a preset, clearing the selection if it pointed there.
    /// Returns false for an unknown id.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        let Some(index) = state.presets.iter().position(|p| p.id == id) else {
            return Ok(false);
        };
        state.presets.remove(index);
        if state.selected.as_deref() == Some(id) {
            state.selected = None;
        }
        self.persist(&state)?;
        Ok(true)
    }

    /// Selects a preset, or clears the selection with `None`.
    pub fn select(&self, id: Option<&str>) {
        lock(&self.state).selected = id.map(str::to_string);
    }

    /// The selected preset, if it still exists.
    pub fn selected(&self) -> Option<PromptPreset> {
        let state = lock(&self.state);
        let id = state.selected.as_deref()?;
        state.presets.iter().find(|p| p.id == id).cloned()
    }

    /// Discards every preset, re-seeds the built-ins and clears the selection.
    pub fn reset_to_default(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.presets = builtin_presets();
        state.selected = None;
        self.persist(&state)
    }
}

/// Fresh copies of the built-ins. `created_at` is offset by index so the
/// seed order survives sorting by creation time.
fn builtin_presets() -> Vec<PromptPreset> {
    let now = Utc::now().timestamp_millis();
    BUILTIN_PRESETS
        .iter()
        .zip(0i64..)
        .map(|((name, prompt, negative), index)| PromptPreset {
            id: mint_id("preset"),
            name: (*name).to_string(),
            prompt: (*prompt).to_string(),
            negative_prompt: Some((*negative).to_string()),
            created_at: now + index,
            updated_at: now + index,
        })
        .collect()
}
