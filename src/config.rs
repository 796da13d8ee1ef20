use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::aggregator::FailurePolicy;
use crate::prompts::{ConceptFilter, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_CONCEPTS};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "nutrilens=info";

/// Main configuration structure loaded from nutrilens.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub classifier: ClassifierConfig,
    pub generator: GeneratorConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    /// Secrets and process settings, loaded from environment variables only
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Image classification service binding (fixed model id and version)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub base_url: String,
    pub user_id: String,
    pub app_id: String,
    pub model_id: String,
    pub model_version_id: String,
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.clarifai.com".to_string(),
            user_id: "clarifai".to_string(),
            app_id: "main".to_string(),
            model_id: "food-item-v1-recognition".to_string(),
            model_version_id: "dfebc169854e429086aceb8368662641".to_string(),
            timeout_ms: 20_000,
        }
    }
}

/// Generative text service binding
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 200,
            timeout_ms: 60_000,
        }
    }
}

/// Sampling and filtering policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub samples: usize,
    pub confidence_threshold: f32,
    pub max_concepts: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            samples: 4,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_concepts: DEFAULT_MAX_CONCEPTS,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn concept_filter(&self) -> ConceptFilter {
        ConceptFilter::new(self.confidence_threshold, self.max_concepts)
    }
}

/// Upload directory for canonical images
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub clarifai_pat: Option<String>,
    pub openai_api_key: Option<String>,
    pub http_bind: SocketAddr,
    pub max_upload_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            clarifai_pat: None,
            openai_api_key: None,
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self::default();

        cfg.clarifai_pat = env_secret("CLARIFAI_PAT");
        cfg.openai_api_key = env_secret("OPENAI_API_KEY");
        if let Ok(v) = std::env::var("NUTRILENS_HTTP_BIND")
            && let Ok(bind) = v.parse::<SocketAddr>()
        {
            cfg.http_bind = bind;
        }
        if let Some(max) = std::env::var("NUTRILENS_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            cfg.max_upload_bytes = max;
        }

        cfg
    }
}

/// Placeholder values from sample .env files count as unset.
fn env_secret(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| {
        let t = v.trim();
        !t.is_empty()
            && !t.contains("${")
            && !t.eq_ignore_ascii_case("your-api-key-here")
            && !t.eq_ignore_ascii_case("changeme")
    })
}

/// Load `NUTRILENS_ENV_FILE` or `.env`. Existing variables are not overridden, so
/// calling this more than once is harmless.
pub fn load_env_file() {
    if let Ok(env_path) = std::env::var("NUTRILENS_ENV_FILE") {
        let _ = dotenvy::from_path(env_path);
    } else {
        let _ = dotenvy::dotenv();
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses NUTRILENS_CONFIG environment variable or defaults to "nutrilens.toml"
    ///
    /// Warnings are emitted through `tracing`; install the subscriber first.
    pub fn load() -> anyhow::Result<Self> {
        load_env_file();

        let config_path =
            std::env::var("NUTRILENS_CONFIG").unwrap_or_else(|_| "nutrilens.toml".to_string());

        let mut config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            Self::from_toml_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        for warning in config.apply_overrides(|key| std::env::var(key).ok()) {
            tracing::warn!("{}", warning);
        }
        config.runtime = RuntimeConfig::load_from_env();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Env-first overrides for the file-backed sections. Returns a warning for
    /// each value that was present but ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(url) = var("CLARIFAI_BASE_URL") {
            self.classifier.base_url = url;
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.generator.base_url = url;
        }
        if let Some(model) = var("NUTRILENS_GENERATOR_MODEL")
            && !model.trim().is_empty()
        {
            self.generator.model = model;
        }
        if let Some(v) = var("NUTRILENS_SAMPLES") {
            match v.parse::<usize>() {
                Ok(samples) => self.pipeline.samples = samples,
                Err(_) => warnings.push(format!("Ignoring NUTRILENS_SAMPLES={v}: not a count")),
            }
        }
        if let Some(v) = var("NUTRILENS_CONFIDENCE_THRESHOLD") {
            match v.parse::<f32>() {
                Ok(threshold) => self.pipeline.confidence_threshold = threshold,
                Err(_) => warnings.push(format!(
                    "Ignoring NUTRILENS_CONFIDENCE_THRESHOLD={v}: not a number"
                )),
            }
        }
        if let Some(v) = var("NUTRILENS_MAX_CONCEPTS") {
            match v.parse::<usize>() {
                Ok(max) => self.pipeline.max_concepts = max,
                Err(_) => {
                    warnings.push(format!("Ignoring NUTRILENS_MAX_CONCEPTS={v}: not a count"))
                }
            }
        }
        if let Some(policy) = var("NUTRILENS_FAILURE_POLICY") {
            match policy.parse::<FailurePolicy>() {
                Ok(p) => self.pipeline.failure_policy = p,
                Err(e) => warnings.push(format!("Ignoring NUTRILENS_FAILURE_POLICY: {e}")),
            }
        }
        if let Some(dir) = var("NUTRILENS_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }

        warnings
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=16).contains(&self.pipeline.samples) {
            anyhow::bail!(
                "pipeline.samples must be between 1 and 16, got {}",
                self.pipeline.samples
            );
        }
        if !(0.0..=1.0).contains(&self.pipeline.confidence_threshold) {
            anyhow::bail!("pipeline.confidence_threshold must be between 0.0 and 1.0");
        }
        if self.pipeline.max_concepts == 0 {
            anyhow::bail!("pipeline.max_concepts must be at least 1");
        }
        if self.generator.max_tokens == 0 {
            anyhow::bail!("generator.max_tokens must be > 0");
        }
        for (name, url) in [
            ("classifier.base_url", &self.classifier.base_url),
            ("generator.base_url", &self.generator.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://, got '{}'", name, url);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_model_binding() {
        let config = Config::default();
        assert_eq!(config.pipeline.samples, 4);
        assert_eq!(config.pipeline.max_concepts, 2);
        assert_eq!(config.pipeline.confidence_threshold, 0.89);
        assert_eq!(config.generator.model, "gpt-4o");
        assert_eq!(config.generator.max_tokens, 200);
        assert_eq!(config.classifier.model_id, "food-item-v1-recognition");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = Config::from_toml_str(
            r#"
            [pipeline]
            samples = 6
            failure_policy = "abort-on-first"

            [generator]
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.samples, 6);
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::AbortOnFirst);
        assert_eq!(config.pipeline.max_concepts, 2);
        assert_eq!(config.generator.model, "gpt-4o-mini");
        assert_eq!(config.generator.max_tokens, 200);
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.pipeline.samples = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generator.base_url = "api.openai.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_and_report_bad_values() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("NUTRILENS_SAMPLES", "6"),
            ("NUTRILENS_FAILURE_POLICY", "retry-forever"),
            ("NUTRILENS_MAX_CONCEPTS", "many"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        let warnings = config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.pipeline.samples, 6);
        assert_eq!(config.generator.base_url, "http://localhost:8080/v1");
        assert_eq!(config.pipeline.failure_policy, FailurePolicy::SkipFailed);
        assert_eq!(config.pipeline.max_concepts, 2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.contains("NUTRILENS_FAILURE_POLICY")));
        assert!(warnings.iter().any(|w| w.contains("NUTRILENS_MAX_CONCEPTS=many")));
    }
}
