//! Clarifai REST client for the food-recognition model

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::clients::traits::ConceptSource;
use crate::config::ClassifierConfig;
use crate::error::{NutritionError, Result};
use crate::normalizer::CanonicalImage;
use crate::schemas::Concept;

/// Clarifai's status code for a successful call.
const STATUS_SUCCESS: u32 = 10000;

pub struct ClarifaiClassifier {
    client: reqwest::Client,
    outputs_url: String,
    pat: String,
}

#[derive(Debug, Deserialize)]
struct PostModelOutputsResponse {
    status: ApiStatus,
    #[serde(default)]
    outputs: Vec<Output>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    code: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    details: String,
}

#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    data: OutputData,
}

#[derive(Debug, Default, Deserialize)]
struct OutputData {
    #[serde(default)]
    concepts: Vec<RawConcept>,
}

#[derive(Debug, Deserialize)]
struct RawConcept {
    name: String,
    value: f32,
}

impl ClarifaiClassifier {
    pub fn new(config: &ClassifierConfig, pat: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NutritionError::Config {
                message: format!("Failed to build classifier HTTP client: {e}"),
            })?;

        let outputs_url = format!(
            "{}/v2/users/{}/apps/{}/models/{}/versions/{}/outputs",
            config.base_url.trim_end_matches('/'),
            config.user_id,
            config.app_id,
            config.model_id,
            config.model_version_id
        );

        Ok(Self {
            client,
            outputs_url,
            pat,
        })
    }

    pub fn outputs_url(&self) -> &str {
        &self.outputs_url
    }
}

#[async_trait]
impl ConceptSource for ClarifaiClassifier {
    async fn concepts(&self, image: &CanonicalImage) -> Result<Vec<Concept>> {
        debug!(bytes = image.as_bytes().len(), "posting image to classifier");

        let body = json!({
            "inputs": [
                { "data": { "image": { "base64": image.to_base64() } } }
            ]
        });

        let response = self
            .client
            .post(&self.outputs_url)
            .header("Authorization", format!("Key {}", self.pat))
            .json(&body)
            .send()
            .await
            .map_err(|e| NutritionError::ClassificationService {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NutritionError::ClassificationService {
                message: format!("failed to read response body: {e}"),
            })?;

        let concepts = parse_outputs(&text).map_err(|err| {
            if status.is_success() {
                err
            } else {
                NutritionError::ClassificationService {
                    message: format!("HTTP {status}: {err}"),
                }
            }
        })?;
        debug!(count = concepts.len(), "classifier returned concepts");
        Ok(concepts)
    }
}

/// Interpret a PostModelOutputs body: status check, then the first output's concepts.
fn parse_outputs(body: &str) -> Result<Vec<Concept>> {
    let parsed: PostModelOutputsResponse =
        serde_json::from_str(body).map_err(|e| NutritionError::ClassificationService {
            message: format!("unexpected response body: {e}"),
        })?;

    if parsed.status.code != STATUS_SUCCESS {
        let mut message = format!(
            "Post model outputs failed, status: {}",
            parsed.status.description
        );
        if !parsed.status.details.is_empty() {
            message.push_str(&format!(" ({})", parsed.status.details));
        }
        return Err(NutritionError::ClassificationService { message });
    }

    let concepts = parsed
        .outputs
        .into_iter()
        .next()
        .map(|output| output.data.concepts)
        .unwrap_or_default()
        .into_iter()
        .map(|c| Concept::new(c.name, c.value))
        .collect();
    Ok(concepts)
}
