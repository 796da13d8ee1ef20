use async_trait::async_trait;

use crate::error::{GenerationFailure, Result};
use crate::normalizer::CanonicalImage;
use crate::prompts::EstimationPrompt;
use crate::schemas::Concept;

/// Image-concept classifier bound to a fixed model.
#[async_trait]
pub trait ConceptSource: Send + Sync {
    /// Concepts for `image` in the service's ranking order. No retries.
    async fn concepts(&self, image: &CanonicalImage) -> Result<Vec<Concept>>;
}

/// Generative text model that answers a prompt about an attached image.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Raw completion text. The success-marker contract is checked by the caller.
    async fn complete(
        &self,
        prompt: &EstimationPrompt,
        image: &CanonicalImage,
    ) -> std::result::Result<String, GenerationFailure>;
}
