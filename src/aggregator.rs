//! Repeated sampling of the estimation chain and cross-sample aggregation.
//!
//! Each iteration runs classify -> prompt -> generate -> parse against the same
//! canonical image, strictly one after another. Numeric fields are combined by the
//! ceiling of their arithmetic mean; everything else comes from the first sample.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::clients::{ClarifaiClassifier, ConceptSource, OpenAiGenerator, TextGenerator};
use crate::config::{Config, PipelineConfig};
use crate::error::{NutritionError, Result};
use crate::estimation::EstimationClient;
use crate::normalizer::CanonicalImage;
use crate::prompts::PromptBuilder;
use crate::response::parse_sample;
use crate::schemas::{AggregateEstimate, NutritionSample};

/// What to do when one sampling iteration fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// The first failed iteration fails the whole request; earlier samples are dropped.
    AbortOnFirst,
    /// Failed iterations are recorded and the estimate uses the samples that succeeded.
    #[default]
    SkipFailed,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "abort-on-first" | "abort" => Ok(FailurePolicy::AbortOnFirst),
            "skip-failed" | "skip" => Ok(FailurePolicy::SkipFailed),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingState {
    Idle,
    Sampling { iteration: usize },
    Aggregating,
    Done,
    Failed,
}

impl fmt::Display for SamplingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingState::Idle => write!(f, "idle"),
            SamplingState::Sampling { iteration } => write!(f, "sampling({iteration})"),
            SamplingState::Aggregating => write!(f, "aggregating"),
            SamplingState::Done => write!(f, "done"),
            SamplingState::Failed => write!(f, "failed"),
        }
    }
}

fn advance(state: &mut SamplingState, next: SamplingState) {
    debug!(from = %state, to = %next, "sampling state");
    *state = next;
}

/// A failed iteration, tagged with the stage that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationFailure {
    pub iteration: usize,
    pub stage: &'static str,
    pub detail: String,
}

impl IterationFailure {
    fn new(iteration: usize, err: &NutritionError) -> Self {
        Self {
            iteration,
            stage: err.stage(),
            detail: err.to_string(),
        }
    }
}

/// Result of one iteration of the chain.
#[derive(Debug)]
pub enum SampleOutcome {
    Sample(NutritionSample),
    Failed {
        iteration: usize,
        error: NutritionError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimationReport {
    pub estimate: AggregateEstimate,
    pub samples_requested: usize,
    pub samples_used: usize,
    pub failures: Vec<IterationFailure>,
}

/// Combine samples field by field.
///
/// Keys come from the first sample. For each key the numeric values found across
/// all samples are averaged and rounded up; with no numeric value the first
/// sample's raw value is kept. Samples lacking a key simply do not contribute.
/// Numeric results are clamped at zero.
pub fn aggregate(samples: &[NutritionSample]) -> Result<AggregateEstimate> {
    let first = samples.first().ok_or_else(|| NutritionError::Aggregation {
        message: "AI API did not return any results".to_string(),
    })?;

    let mut fields = Map::new();
    for (key, first_value) in first.fields() {
        let values: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.get(key))
            .filter_map(Value::as_f64)
            .collect();
        let value = if values.is_empty() {
            first_value.clone()
        } else {
            ceil_mean(&values)
        };
        fields.insert(key.clone(), value);
    }

    Ok(AggregateEstimate::from_map(fields))
}

fn ceil_mean(values: &[f64]) -> Value {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    // nutrition quantities are never negative
    let ceiled = mean.ceil().max(0.0);
    if ceiled.is_finite() && ceiled.abs() < i64::MAX as f64 {
        Value::from(ceiled as i64)
    } else {
        Value::from(ceiled)
    }
}

pub struct SampleAggregator {
    concepts: Arc<dyn ConceptSource>,
    prompts: PromptBuilder,
    estimator: EstimationClient,
    samples: usize,
    policy: FailurePolicy,
}

impl SampleAggregator {
    pub fn new(
        concepts: Arc<dyn ConceptSource>,
        generator: Arc<dyn TextGenerator>,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            concepts,
            prompts: PromptBuilder::new(pipeline.concept_filter()),
            estimator: EstimationClient::new(generator),
            samples: pipeline.samples,
            policy: pipeline.failure_policy,
        }
    }

    /// Build the production clients from configuration; both secrets are required.
    pub fn from_config(config: &Config) -> Result<Self> {
        let pat = config
            .runtime
            .clarifai_pat
            .clone()
            .ok_or_else(|| NutritionError::Config {
                message: "CLARIFAI_PAT is not set".to_string(),
            })?;
        let api_key = config
            .runtime
            .openai_api_key
            .clone()
            .ok_or_else(|| NutritionError::Config {
                message: "OPENAI_API_KEY is not set".to_string(),
            })?;

        let classifier = ClarifaiClassifier::new(&config.classifier, pat)?;
        let generator = OpenAiGenerator::new(&config.generator, api_key)?;
        Ok(Self::new(
            Arc::new(classifier),
            Arc::new(generator),
            &config.pipeline,
        ))
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn concept_source(&self) -> &Arc<dyn ConceptSource> {
        &self.concepts
    }

    /// One full pass of the chain.
    pub async fn run_iteration(&self, image: &CanonicalImage) -> Result<NutritionSample> {
        let concepts = self.concepts.concepts(image).await?;
        let prompt = self.prompts.build(&concepts);
        let raw = self.estimator.estimate(prompt, image).await?;
        parse_sample(raw.as_str())
    }

    pub async fn sample(&self, iteration: usize, image: &CanonicalImage) -> SampleOutcome {
        match self.run_iteration(image).await {
            Ok(sample) => SampleOutcome::Sample(sample),
            Err(error) => SampleOutcome::Failed { iteration, error },
        }
    }

    /// Run all iterations and aggregate according to the failure policy.
    pub async fn estimate(&self, image: &CanonicalImage) -> Result<EstimationReport> {
        let mut state = SamplingState::Idle;
        let mut outcomes = Vec::with_capacity(self.samples);

        for iteration in 1..=self.samples {
            advance(&mut state, SamplingState::Sampling { iteration });
            let outcome = self.sample(iteration, image).await;
            if let SampleOutcome::Failed { iteration, error } = &outcome {
                warn!(iteration, stage = error.stage(), "sampling iteration failed: {}", error);
            }

            match outcome {
                SampleOutcome::Failed { iteration, error }
                    if self.policy == FailurePolicy::AbortOnFirst =>
                {
                    advance(&mut state, SamplingState::Failed);
                    return Err(NutritionError::Iteration {
                        iteration,
                        source: Box::new(error),
                    });
                }
                outcome => outcomes.push(outcome),
            }
        }

        advance(&mut state, SamplingState::Aggregating);
        let mut samples = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                SampleOutcome::Sample(sample) => samples.push(sample),
                SampleOutcome::Failed { iteration, error } => {
                    failures.push(IterationFailure::new(iteration, &error))
                }
            }
        }

        let estimate = match aggregate(&samples) {
            Ok(estimate) => estimate,
            Err(err) => {
                advance(&mut state, SamplingState::Failed);
                debug!(cause = %err, "no sample survived to aggregation");
                let last = failures
                    .last()
                    .map(|f| format!("; last failure on iteration {}: {}", f.iteration, f.detail))
                    .unwrap_or_default();
                return Err(NutritionError::Aggregation {
                    message: format!(
                        "{} of {} iterations failed{}",
                        failures.len(),
                        self.samples,
                        last
                    ),
                });
            }
        };

        advance(&mut state, SamplingState::Done);
        info!(
            requested = self.samples,
            used = samples.len(),
            failed = failures.len(),
            "nutrition estimate aggregated"
        );

        Ok(EstimationReport {
            estimate,
            samples_requested: self.samples,
            samples_used: samples.len(),
            failures,
        })
    }
}
