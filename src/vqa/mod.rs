//! Vision-language model integration.
//!
//! [`VqaModel`] splits a VQA call into image preprocessing and generation so
//! different backends can be swapped in without touching the pipeline. The
//! bundled [`VqaClient`] talks to an OpenAI-compatible vision endpoint.

mod client;
mod prompts;

pub use client::{EncodedImage, VqaClient};
pub use prompts::Prompts;

use crate::error::Result;
use std::path::Path;

/// A vision-language model that answers questions about images.
///
/// Implementations must report a missing image file as
/// [`GraderError::ImageNotFound`](crate::error::GraderError::ImageNotFound)
/// so callers can record it and move on.
#[allow(async_fn_in_trait)]
pub trait VqaModel {
    /// Backend-specific preprocessed image.
    type Image;

    /// Load and preprocess an image file.
    async fn process_image(&self, image_path: &Path) -> Result<Self::Image>;

    /// Generate an answer to `question` about a preprocessed image.
    async fn generate(&self, question: &str, image: &Self::Image) -> Result<String>;

    /// Preprocess `image_path` and answer `question` about it.
    async fn run_vqa(&self, question: &str, image_path: &Path) -> Result<String> {
        let image = self.process_image(image_path).await?;
        self.generate(question, &image).await
    }
}
