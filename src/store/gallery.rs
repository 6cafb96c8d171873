//! Durable collection of produced images with tagging, filtering and selection.

use crate::error::Result;
use crate::id::mint_id;
use crate::image::{GeneratedImage, GenerationRequest};
use crate::store::{document, lock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One image in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryImage {
    /// Unique identifier.
    pub id: String,
    /// Local path, remote URL or data URI.
    pub file_path: String,
    /// Optional thumbnail location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    /// Tags in display order, without duplicates.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form generation metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// When the image entered the gallery.
    pub created_at: DateTime<Utc>,
}

impl GalleryImage {
    fn matches(&self, tag: Option<&str>, needle: &str) -> bool {
        if let Some(tag) = tag {
            if !self.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if needle.is_empty() {
            return true;
        }
        self.file_path.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

/// Input for [`GalleryStore::add`]; the store assigns the id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewGalleryImage {
    /// Local path, remote URL or data URI.
    pub file_path: String,
    /// Optional thumbnail location.
    pub thumbnail_path: Option<String>,
    /// Initial tags.
    pub tags: Vec<String>,
    /// Free-form metadata.
    pub metadata: Option<Map<String, Value>>,
    /// Creation instant; defaults to now.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewGalleryImage {
    /// Creates an entry for the given path or URL.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    /// Sets the initial tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the metadata map.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the creation instant.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds an entry from a produced image and the request behind it.
    ///
    /// Uses the saved file when there is one, else the source URL.
    pub fn from_generated(image: &GeneratedImage, request: &GenerationRequest) -> Self {
        let file_path = image
            .local_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| image.source_url().to_string());

        let mut metadata = Map::new();
        metadata.insert("imageId".into(), image.id().into());
        metadata.insert("contentType".into(), image.content_type().into());
        metadata.insert("prompt".into(), request.prompt.clone().into());
        if let Some(negative) = &request.negative_prompt {
            metadata.insert("negativePrompt".into(), negative.clone().into());
        }
        if let Some(model) = request.model {
            metadata.insert("model".into(), model.as_str().into());
        }
        if let Some(ratio) = request.aspect_ratio {
            metadata.insert("aspectRatio".into(), ratio.as_str().into());
        }
        if let Some(resolution) = request.resolution {
            metadata.insert("resolution".into(), resolution.as_str().into());
        }
        if let Some(seed) = request.seed {
            metadata.insert("seed".into(), seed.into());
        }
        if let (Some(w), Some(h)) = (image.width(), image.height()) {
            metadata.insert("width".into(), w.into());
            metadata.insert("height".into(), h.into());
        }

        Self::new(file_path).with_metadata(metadata)
    }
}

/// Field the gallery view is sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    /// Creation instant.
    #[default]
    Date,
    /// File path, compared byte-wise.
    Name,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest or smallest first.
    Asc,
    /// Newest or largest first.
    #[default]
    Desc,
}

#[derive(Debug, Default, Deserialize)]
struct GalleryDocument {
    #[serde(default)]
    images: Vec<GalleryImage>,
}

#[derive(Serialize)]
struct GalleryDocumentRef<'a> {
    images: &'a [GalleryImage],
}

#[derive(Debug, Default)]
struct GalleryState {
    images: Vec<GalleryImage>,
    filter_tag: Option<String>,
    search_query: String,
    sort_field: SortField,
    sort_order: SortOrder,
    selected: HashSet<String>,
}

impl GalleryState {
    fn view(&self) -> Vec<GalleryImage> {
        let needle = self.search_query.trim().to_lowercase();
        let mut view: Vec<GalleryImage> = self
            .images
            .iter()
            .filter(|img| img.matches(self.filter_tag.as_deref(), &needle))
            .cloned()
            .collect();

        let field = self.sort_field;
        let order = self.sort_order;
        view.sort_by(|a, b| {
            let ord = match field {
                SortField::Date => a.created_at.cmp(&b.created_at),
                SortField::Name => a.file_path.cmp(&b.file_path),
            };
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        view
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut GalleryImage> {
        self.images.iter_mut().find(|img| img.id == id)
    }
}

/// Gallery of produced images, persisted as one JSON document.
///
/// Filter, search, sort and selection are view state and are not persisted.
/// Every mutation of the image list is written through before returning.
/// A failed write returns `Err` but the change stays applied in memory, so
/// the store keeps working when the data directory is unwritable and the next
/// successful write brings the document back in sync.
#[derive(Debug)]
pub struct GalleryStore {
    path: PathBuf,
    state: Mutex<GalleryState>,
}

impl GalleryStore {
    /// Opens the gallery at `path`. A missing or corrupt file yields an empty gallery.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc: GalleryDocument = document::load(&path).unwrap_or_default();
        tracing::debug!(path = %path.display(), count = doc.images.len(), "opened gallery");
        Self {
            path,
            state: Mutex::new(GalleryState {
                images: doc.images,
                ..Default::default()
            }),
        }
    }

    /// Opens the gallery under the data root.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(crate::paths::gallery_path()?))
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &GalleryState) -> Result<()> {
        document::save(
            &self.path,
            &GalleryDocumentRef {
                images: &state.images,
            },
        )
    }

    /// Adds images, newest first, keeping the input order among them.
    pub fn add(&self, entries: Vec<NewGalleryImage>) -> Result<Vec<GalleryImage>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let added: Vec<GalleryImage> = entries
            .into_iter()
            .map(|entry| GalleryImage {
                id: mint_id("img"),
                file_path: entry.file_path,
                thumbnail_path: entry.thumbnail_path,
                tags: dedupe_tags(entry.tags),
                metadata: entry.metadata,
                created_at: entry.created_at.unwrap_or(now),
            })
            .collect();

        let mut state = lock(&self.state);
        let mut images = added.clone();
        images.append(&mut state.images);
        state.images = images;
        tracing::debug!(count = added.len(), total = state.images.len(), "added gallery images");
        self.persist(&state)?;
        Ok(added)
    }

    /// Adds a single image.
    pub fn add_one(&self, entry: NewGalleryImage) -> Result<GalleryImage> {
        let mut added = self.add(vec![entry])?;
        Ok(added.remove(0))
    }

    /// Removes the given ids, also dropping them from the selection.
    /// Returns how many images were removed.
    pub fn remove<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let ids: HashSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        let mut state = lock(&self.state);
        let before = state.images.len();
        state.images.retain(|img| !ids.contains(img.id.as_str()));
        state.selected.retain(|id| !ids.contains(id.as_str()));
        let removed = before - state.images.len();
        if removed > 0 {
            self.persist(&state)?;
        }
        Ok(removed)
    }

    /// Adds a tag. Returns false if the image is unknown or already has it.
    pub fn add_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(false);
        }
        let mut state = lock(&self.state);
        let Some(image) = state.find_mut(id) else {
            return Ok(false);
        };
        if image.tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        image.tags.push(tag.to_string());
        self.persist(&state)?;
        Ok(true)
    }

    /// Removes a tag. Returns false if nothing changed.
    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        let Some(image) = state.find_mut(id) else {
            return Ok(false);
        };
        let before = image.tags.len();
        image.tags.retain(|t| t != tag);
        if image.tags.len() == before {
            return Ok(false);
        }
        self.persist(&state)?;
        Ok(true)
    }

    /// Replaces an image's tags. Duplicates are dropped, first occurrence wins.
    pub fn set_tags(&self, id: &str, tags: Vec<String>) -> Result<bool> {
        let mut state = lock(&self.state);
        let Some(image) = state.find_mut(id) else {
            return Ok(false);
        };
        image.tags = dedupe_tags(tags);
        self.persist(&state)?;
        Ok(true)
    }

    /// Restricts the view to images carrying `tag`.
    pub fn set_filter_tag(&self, tag: Option<String>) {
        lock(&self.state).filter_tag = tag.filter(|t| !t.trim().is_empty());
    }

    /// Sets the case-insensitive search over tags and file paths.
    pub fn set_search_query(&self, query: impl Into<String>) {
        lock(&self.state).search_query = query.into();
    }

    /// Sets the view ordering.
    pub fn set_sort(&self, field: SortField, order: SortOrder) {
        let mut state = lock(&self.state);
        state.sort_field = field;
        state.sort_order = order;
    }

    /// Current view ordering.
    pub fn sort(&self) -> (SortField, SortOrder) {
        let state = lock(&self.state);
        (state.sort_field, state.sort_order)
    }

    /// Images passing the tag filter and the search, in view order.
    pub fn filtered(&self) -> Vec<GalleryImage> {
        lock(&self.state).view()
    }

    /// All images, newest insertions first.
    pub fn images(&self) -> Vec<GalleryImage> {
        lock(&self.state).images.clone()
    }

    /// Looks up one image.
    pub fn get(&self, id: &str) -> Option<GalleryImage> {
        lock(&self.state)
            .images
            .iter()
            .find(|img| img.id == id)
            .cloned()
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        lock(&self.state).images.len()
    }

    /// Returns true if the gallery holds no images.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every tag in use, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        let state = lock(&self.state);
        let tags: BTreeSet<&str> = state
            .images
            .iter()
            .flat_map(|img| img.tags.iter().map(String::as_str))
            .collect();
        tags.into_iter().map(str::to_string).collect()
    }

    /// Toggles one id in the selection.
    pub fn toggle_select(&self, id: &str) {
        let mut state = lock(&self.state);
        if !state.selected.remove(id) {
            state.selected.insert(id.to_string());
        }
    }

    /// Selects exactly the images in the current view.
    pub fn select_all(&self) {
        let mut state = lock(&self.state);
        let ids = state.view().into_iter().map(|img| img.id).collect();
        state.selected = ids;
    }

    /// Empties the selection.
    pub fn clear_selection(&self) {
        lock(&self.state).selected.clear();
    }

    /// Returns true if anything is selected.
    pub fn has_selection(&self) -> bool {
        !lock(&self.state).selected.is_empty()
    }

    /// Returns true if `id` is selected.
    pub fn is_selected(&self, id: &str) -> bool {
        lock(&self.state).selected.contains(id)
    }

    /// Selected images in gallery order.
    pub fn selected_images(&self) -> Vec<GalleryImage> {
        let state = lock(&self.state);
        state
            .images
            .iter()
            .filter(|img| state.selected.contains(&img.id))
            .cloned()
            .collect()
    }

    /// Removes every image and clears the selection.
    pub fn clear_all(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.images.clear();
        state.selected.clear();
        self.persist(&state)
    }
}

fn dedupe_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
