//! Generation task lifecycle, form state and history.

use crate::error::{GenStudioError, Result};
use crate::id::mint_id;
use crate::image::{
    clamp_num_images, AspectRatio, GeneratedImage, GenerationRequest, GenerationResult,
    ImageGenerationService, ImageGenerationServiceExt, ModelTier, OutputFormat, Resolution,
    MAX_REFERENCE_IMAGES, MIN_NUM_IMAGES,
};
use crate::store::{GalleryStore, NewGalleryImage, PromptPreset};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Most finished tasks kept in the history.
pub const HISTORY_CAPACITY: usize = 50;

/// Progress reported once the request has been handed to the provider.
const SUBMITTED_PROGRESS: i32 = 10;

/// Error recorded for a task whose [`TaskController::run`] future was dropped.
pub const CANCELLED_MESSAGE: &str = "generation cancelled";

/// Lifecycle state of a [`GenerationTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet submitted.
    Pending,
    /// Waiting on the provider.
    Processing,
    /// Finished with images.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    id: String,
    status: TaskStatus,
    progress: u8,
    request: GenerationRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<GenerationResult>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl GenerationTask {
    fn new(request: GenerationRequest) -> Self {
        Self {
            id: mint_id("task"),
            status: TaskStatus::Pending,
            progress: 0,
            request,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn finish(&mut self, result: GenerationResult) {
        if result.success() {
            self.status = TaskStatus::Completed;
            self.progress = 100;
        } else {
            self.status = TaskStatus::Failed;
            self.progress = 0;
        }
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Progress in `[0, 100]`.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// The request this task submitted.
    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Outcome, once terminal.
    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    /// Creation instant.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the task reached a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

/// Editable generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationForm {
    /// Prompt text.
    pub prompt: String,
    /// Negative prompt; empty means none.
    pub negative_prompt: String,
    /// Model tier. A new form starts at `Pro`.
    pub model: ModelTier,
    /// Image count in `[1, 4]`.
    pub num_images: u8,
    /// Aspect ratio. Unset leaves it to the adapter: `1:1` for text-to-image,
    /// the reference's own ratio for image-to-image.
    pub aspect_ratio: Option<AspectRatio>,
    /// Output resolution.
    pub resolution: Resolution,
    /// Output format.
    pub output_format: OutputFormat,
    /// Seed.
    pub seed: Option<i64>,
    /// Reference images, at most 14.
    pub reference_images: Vec<String>,
}

impl Default for GenerationForm {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            model: ModelTier::Pro,
            num_images: MIN_NUM_IMAGES,
            aspect_ratio: None,
            resolution: Resolution::default(),
            output_format: OutputFormat::default(),
            seed: None,
            reference_images: Vec::new(),
        }
    }
}

/// Drives generation tasks from form state.
///
/// At most one task is processing at a time. Terminal tasks are moved into
/// a bounded, most-recent-first history.
#[derive(Debug, Default)]
pub struct TaskController {
    form: GenerationForm,
    current: Option<GenerationTask>,
    generated_images: Vec<GeneratedImage>,
    last_error: Option<String>,
    history: VecDeque<GenerationTask>,
    save_dir: Option<PathBuf>,
    http: reqwest::Client,
}

impl TaskController {
    /// Creates a controller with the default form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves produced images into `dir` during [`run`](Self::run).
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Current form state.
    pub fn form(&self) -> &GenerationForm {
        &self.form
    }

    /// Sets the prompt.
    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.form.prompt = prompt.into();
    }

    /// Sets the negative prompt.
    pub fn set_negative_prompt(&mut self, negative: impl Into<String>) {
        self.form.negative_prompt = negative.into();
    }

    /// Sets the model tier.
    pub fn set_model(&mut self, model: ModelTier) {
        self.form.model = model;
    }

    /// Sets the image count, clamped into `[1, 4]`.
    pub fn set_num_images(&mut self, count: i32) {
        self.form.num_images = clamp_num_images(i64::from(count));
    }

    /// Sets the aspect ratio.
    pub fn set_aspect_ratio(&mut self, ratio: AspectRatio) {
        self.form.aspect_ratio = Some(ratio);
    }

    /// Sets the resolution.
    pub fn set_resolution(&mut self, resolution: Resolution) {
        self.form.resolution = resolution;
    }

    /// Sets the output format.
    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.form.output_format = format;
    }

    /// Sets or clears the seed.
    pub fn set_seed(&mut self, seed: Option<i64>) {
        self.form.seed = seed;
    }

    /// Copies a preset's prompt and negative prompt into the form.
    pub fn apply_preset(&mut self, preset: &PromptPreset) {
        self.form.prompt = preset.prompt.clone();
        self.form.negative_prompt = preset.negative_prompt.clone().unwrap_or_default();
    }

    /// Appends a reference image. Returns false once 14 are present.
    pub fn add_reference_image(&mut self, image: impl Into<String>) -> bool {
        if self.form.reference_images.len() >= MAX_REFERENCE_IMAGES {
            return false;
        }
        self.form.reference_images.push(image.into());
        true
    }

    /// Removes the reference image at `index`, if any.
    pub fn remove_reference_image(&mut self, index: usize) -> Option<String> {
        (index < self.form.reference_images.len())
            .then(|| self.form.reference_images.remove(index))
    }

    /// Removes every reference image.
    pub fn clear_reference_images(&mut self) {
        self.form.reference_images.clear();
    }

    /// Returns true if the form carries reference images.
    pub fn has_reference_images(&self) -> bool {
        !self.form.reference_images.is_empty()
    }

    /// Builds a request from the form: image-to-image when references are
    /// present, text-to-image otherwise.
    pub fn build_request(&self) -> GenerationRequest {
        let form = &self.form;
        let negative = form.negative_prompt.trim();
        GenerationRequest {
            prompt: form.prompt.clone(),
            negative_prompt: (!negative.is_empty()).then(|| negative.to_string()),
            num_images: form.num_images,
            aspect_ratio: form.aspect_ratio,
            resolution: Some(form.resolution),
            output_format: Some(form.output_format),
            seed: form.seed,
            model: Some(form.model),
            reference_images: form.reference_images.clone(),
        }
    }

    /// Returns true while a task is processing.
    pub fn is_generating(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|task| task.status == TaskStatus::Processing)
    }

    /// Returns true if the prompt is non-blank and nothing is processing.
    pub fn can_generate(&self) -> bool {
        !self.form.prompt.trim().is_empty() && !self.is_generating()
    }

    /// Creates a task from the form and moves it to `Processing`.
    pub fn start(&mut self) -> Result<&GenerationTask> {
        if self.is_generating() {
            return Err(GenStudioError::TaskInProgress);
        }
        if self.form.prompt.trim().is_empty() {
            return Err(GenStudioError::InvalidRequest("prompt is empty".into()));
        }

        let mut task = GenerationTask::new(self.build_request());
        task.status = TaskStatus::Processing;
        self.last_error = None;
        tracing::debug!(task = %task.id, image_to_image = task.request.is_image_to_image(), "generation task started");
        Ok(self.current.insert(task))
    }

    fn processing_mut(&mut self) -> Result<&mut GenerationTask> {
        self.current
            .as_mut()
            .filter(|task| task.status == TaskStatus::Processing)
            .ok_or(GenStudioError::NoActiveTask)
    }

    /// Updates progress of the processing task, clamped into `[0, 100]`.
    pub fn update_progress(&mut self, progress: i32) -> Result<u8> {
        let task = self.processing_mut()?;
        task.progress = progress.clamp(0, 100) as u8;
        Ok(task.progress)
    }

    /// Completes the processing task with `images`.
    /// An empty list fails the task with `NoImageProduced`.
    pub fn complete(&mut self, images: Vec<GeneratedImage>) -> Result<&GenerationTask> {
        self.record(GenerationResult::succeeded(images, None))
    }

    /// Fails the processing task with `message`.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<&GenerationTask> {
        self.record(GenerationResult::failed_with_message(message))
    }

    /// Finishes the processing task with an adapter result.
    pub fn record(&mut self, result: GenerationResult) -> Result<&GenerationTask> {
        let task = self.processing_mut()?;
        task.finish(result);
        let task = task.clone();

        match task.result.as_ref() {
            Some(result) if result.success() => {
                self.generated_images = result.images().to_vec();
                tracing::debug!(task = %task.id, count = self.generated_images.len(), "generation task completed");
            }
            Some(result) => {
                self.last_error = result.error().map(str::to_string);
                tracing::debug!(task = %task.id, error = ?self.last_error, "generation task failed");
            }
            None => {}
        }

        self.history.push_front(task);
        self.history.truncate(HISTORY_CAPACITY);

        let current = self.current.as_ref().ok_or(GenStudioError::NoActiveTask)?;
        Ok(current)
    }

    /// Runs one generation end to end: start, submit, record.
    ///
    /// Dropping the returned future before it resolves cancels the
    /// generation: the processing task is failed with [`CANCELLED_MESSAGE`]
    /// and the controller can start again.
    ///
    /// When a save directory is configured, produced images are written there
    /// first. When `gallery` is given, successful images are added to it; a
    /// gallery write failure is logged and does not fail the task.
    pub async fn run<S>(
        &mut self,
        service: &S,
        gallery: Option<&GalleryStore>,
    ) -> Result<&GenerationTask>
    where
        S: ImageGenerationService + ?Sized,
    {
        let request = self.start()?.request.clone();
        self.update_progress(SUBMITTED_PROGRESS)?;
        let save_dir = self.save_dir.clone();
        let http = self.http.clone();
        let in_flight = InFlight::new(self);

        let mut result = service.generate(&request).await;

        if let Some(dir) = &save_dir {
            for image in result.images_mut() {
                if let Err(err) = image.save_to_dir(dir, &http).await {
                    tracing::warn!(id = %image.id(), error = %err, "failed to save generated image");
                }
            }
        }

        let this = in_flight.release().ok_or(GenStudioError::NoActiveTask)?;
        let task = this.record(result)?;

        if let (Some(gallery), Some(result)) = (gallery, task.result()) {
            if result.success() {
                let entries = result
                    .images()
                    .iter()
                    .map(|image| NewGalleryImage::from_generated(image, &task.request))
                    .collect();
                if let Err(err) = gallery.add(entries) {
                    tracing::warn!(task = %task.id, error = %err, "failed to add images to gallery");
                }
            }
        }

        Ok(task)
    }

    /// Task started most recently, if any.
    pub fn current_task(&self) -> Option<&GenerationTask> {
        self.current.as_ref()
    }

    /// Progress of the current task, 0 when there is none.
    pub fn progress(&self) -> u8 {
        self.current.as_ref().map_or(0, |task| task.progress)
    }

    /// Images of the last completed task.
    pub fn generated_images(&self) -> &[GeneratedImage] {
        &self.generated_images
    }

    /// Error of the last failed task, cleared by the next start.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Finished tasks, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &GenerationTask> {
        self.history.iter()
    }

    /// Drops the last results and error. A processing task is kept.
    pub fn clear_results(&mut self) {
        self.generated_images.clear();
        self.last_error = None;
        if !self.is_generating() {
            self.current = None;
        }
    }

    /// Clears prompt, negative prompt, count, seed and references, then
    /// the results. Model, ratio, resolution and format are kept.
    pub fn reset_form(&mut self) {
        self.form.prompt.clear();
        self.form.negative_prompt.clear();
        self.form.num_images = MIN_NUM_IMAGES;
        self.form.seed = None;
        self.form.reference_images.clear();
        self.clear_results();
    }
}

/// Holds the controller while a `run` awaits the provider. If the future is
/// dropped before [`InFlight::release`], the processing task is failed.
struct InFlight<'a> {
    controller: Option<&'a mut TaskController>,
}

impl<'a> InFlight<'a> {
    fn new(controller: &'a mut TaskController) -> Self {
        Self {
            controller: Some(controller),
        }
    }

    fn release(mut self) -> Option<&'a mut TaskController> {
        self.controller.take()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(controller) = self.controller.take() else {
            return;
        };
        if controller.is_generating() {
            tracing::debug!("generation dropped before the provider answered");
            if let Err(err) = controller.fail(CANCELLED_MESSAGE) {
                tracing::warn!(error = %err, "failed to record cancelled generation");
            }
        }
    }
}
