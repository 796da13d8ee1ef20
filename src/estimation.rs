//! Estimation client: one generative call plus the success-marker check.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clients::TextGenerator;
use crate::error::{GenerationFailure, Result};
use crate::normalizer::CanonicalImage;
use crate::prompts::{EstimationPrompt, first_line, has_success_marker};

/// A reply that passed the success-marker check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawModelResponse(String);

impl RawModelResponse {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct EstimationClient {
    generator: Arc<dyn TextGenerator>,
}

impl EstimationClient {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Send `prompt` (consumed) with the image attached and validate the reply marker.
    pub async fn estimate(
        &self,
        prompt: EstimationPrompt,
        image: &CanonicalImage,
    ) -> Result<RawModelResponse> {
        let text = self.generator.complete(&prompt, image).await?;
        let text = text.trim();

        if !has_success_marker(text) {
            let first_line = first_line(text).chars().take(120).collect::<String>();
            warn!(%first_line, "generative reply missing success marker");
            return Err(GenerationFailure::MissingSuccessMarker { first_line }.into());
        }

        debug!(chars = text.len(), "generative reply accepted");
        Ok(RawModelResponse(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NutritionError;
    use crate::prompts::PromptBuilder;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    struct Fixed(std::result::Result<String, GenerationFailure>);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn complete(
            &self,
            _prompt: &EstimationPrompt,
            _image: &CanonicalImage,
        ) -> std::result::Result<String, GenerationFailure> {
            self.0.clone()
        }
    }

    fn image() -> CanonicalImage {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([9, 9, 9])))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        crate::normalizer::normalize(png.get_ref()).unwrap()
    }

    async fn run(reply: std::result::Result<String, GenerationFailure>) -> Result<RawModelResponse> {
        let client = EstimationClient::new(Arc::new(Fixed(reply)));
        client
            .estimate(PromptBuilder::default().build(&[]), &image())
            .await
    }

    #[tokio::test]
    async fn marked_reply_is_returned_trimmed() {
        let raw = run(Ok("\n  success:\n{\"name\": \"Salad\"}  \n".into()))
            .await
            .unwrap();
        assert_eq!(raw.as_str(), "success:\n{\"name\": \"Salad\"}");
    }

    #[tokio::test]
    async fn unmarked_reply_is_a_soft_generation_failure() {
        let err = run(Ok("I think this is a salad.\n{}".into())).await.unwrap_err();
        match err {
            NutritionError::GenerationService {
                failure: GenerationFailure::MissingSuccessMarker { first_line },
            } => assert_eq!(first_line, "I think this is a salad."),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_keeps_error_prefix() {
        let err = run(Err(GenerationFailure::Transport("timed out".into())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Error: timed out");
    }
}
