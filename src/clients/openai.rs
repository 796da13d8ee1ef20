//! OpenAI-compatible chat-completions client for nutrition estimation

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::traits::TextGenerator;
use crate::config::GeneratorConfig;
use crate::error::{GenerationFailure, NutritionError, Result};
use crate::normalizer::CanonicalImage;
use crate::prompts::EstimationPrompt;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    completions_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NutritionError::Config {
                message: format!("Failed to build generator HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            completions_url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn request<'a>(&'a self, prompt: &'a EstimationPrompt, image: &CanonicalImage) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.as_str(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn complete(
        &self,
        prompt: &EstimationPrompt,
        image: &CanonicalImage,
    ) -> std::result::Result<String, GenerationFailure> {
        debug!(model = %self.model, max_tokens = self.max_tokens, "requesting completion");

        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt, image))
            .send()
            .await
            .map_err(|e| GenerationFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(GenerationFailure::Transport(format!(
                "generation service returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Transport(format!("invalid completion body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationFailure::Transport("no completion returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptBuilder;
    use crate::schemas::Concept;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn request_attaches_prompt_and_image() {
        let generator =
            OpenAiGenerator::new(&GeneratorConfig::default(), "sk-test".to_string()).unwrap();
        let prompt = PromptBuilder::default().build(&[Concept::new("ramen", 0.95)]);

        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([5, 5, 5])))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let image = crate::normalizer::normalize(png.get_ref()).unwrap();

        let body = serde_json::to_value(generator.request(&prompt, &image)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert!(
            body["messages"][0]["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("ramen 0.95")
        );
        assert_eq!(body["messages"][0]["content"][1]["type"], "image_url");
        assert!(
            body["messages"][0]["content"][1]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")
        );
    }
}
