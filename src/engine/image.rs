//! Making sure an image is available before a container is started.
//!
//! Images whose name carries the custom-build marker are built from a local
//! build context (`<custom_images_dir>/<name-before-colon>/Dockerfile`); all
//! others are pulled from their registry. A cached image short-circuits both.

use super::EngineCli;
use crate::env::engine::CUSTOM_IMAGE_MARKER;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// How a missing image would be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAction {
    Build,
    Pull,
}

impl ImageAction {
    /// Progress message shown while the action runs.
    pub fn in_progress_message(self) -> &'static str {
        match self {
            ImageAction::Build => "Building image",
            ImageAction::Pull => "Pulling image",
        }
    }

    /// Progress message shown once the image is available.
    pub fn done_message(self) -> &'static str {
        match self {
            ImageAction::Build => "Build successful",
            ImageAction::Pull => "Pull successful",
        }
    }
}

/// Ensures images exist locally, building or pulling as needed.
#[derive(Debug, Clone)]
pub struct ImageProvisioner {
    engine: EngineCli,
    custom_images_dir: PathBuf,
}

impl ImageProvisioner {
    pub fn new(engine: EngineCli, custom_images_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            custom_images_dir: custom_images_dir.into(),
        }
    }

    /// Whether `image` follows the local-build naming convention.
    pub fn is_custom(image: &str) -> bool {
        image.contains(CUSTOM_IMAGE_MARKER)
    }

    pub fn action_for(image: &str) -> ImageAction {
        if Self::is_custom(image) {
            ImageAction::Build
        } else {
            ImageAction::Pull
        }
    }

    /// Build context directory for a custom image.
    pub fn build_context(&self, image: &str) -> PathBuf {
        let base = image.split(':').next().unwrap_or(image);
        self.custom_images_dir.join(base)
    }

    pub fn custom_images_dir(&self) -> &Path {
        &self.custom_images_dir
    }

    /// Make `image` available locally.
    ///
    /// A single attempt is made; there are no retries.
    ///
    /// # Errors
    ///
    /// Returns `BuildFailed` or `PullFailed` carrying the engine output, or
    /// `Timeout` when the build (60 s) or pull (180 s) runs over.
    pub async fn ensure_image(&self, image: &str) -> Result<ImageAction> {
        let action = Self::action_for(image);

        if self.engine.image_exists(image).await? {
            info!("Image {} already exists locally, skipping {:?}", image, action);
            return Ok(action);
        }

        match action {
            ImageAction::Build => {
                let context = self.build_context(image);
                self.engine.build_image(image, &context).await?;
            }
            ImageAction::Pull => self.engine.pull_image(image).await?,
        }
        Ok(action)
    }
}
