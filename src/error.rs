//! Domain-specific error types for nutrilens

use thiserror::Error;

/// Main error type for the estimation pipeline
#[derive(Error, Debug)]
pub enum NutritionError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Image decode error: {message}")]
    ImageDecode { message: String },

    #[error("Classification service error: {message}")]
    ClassificationService { message: String },

    #[error("Error: {failure}")]
    GenerationService { failure: GenerationFailure },

    #[error("Response format error: {message}")]
    ResponseFormat { message: String },

    #[error("Aggregation error: {message}")]
    Aggregation { message: String },

    #[error("AI API call failed on iteration {iteration}: {source}")]
    Iteration {
        iteration: usize,
        source: Box<NutritionError>,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

/// Why a generative call produced no usable reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    /// Service unreachable, non-2xx status, or an undecodable envelope.
    #[error("{0}")]
    Transport(String),

    /// The reply arrived but its first line lacks the success marker.
    #[error("GPT response does not contain 'success' in the first line (got {first_line:?})")]
    MissingSuccessMarker { first_line: String },
}

impl NutritionError {
    /// Pipeline stage the error originated from, used to tag per-iteration failures.
    pub fn stage(&self) -> &'static str {
        match self {
            NutritionError::Config { .. } => "config",
            NutritionError::ImageDecode { .. } => "normalize",
            NutritionError::ClassificationService { .. } => "classify",
            NutritionError::GenerationService { .. } => "generate",
            NutritionError::ResponseFormat { .. } => "parse",
            NutritionError::Aggregation { .. } => "aggregate",
            NutritionError::Iteration { source, .. } => source.stage(),
            NutritionError::Storage { .. } => "storage",
            NutritionError::Serialization { .. } => "serialize",
        }
    }
}

impl From<serde_json::Error> for NutritionError {
    fn from(err: serde_json::Error) -> Self {
        NutritionError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<image::ImageError> for NutritionError {
    fn from(err: image::ImageError) -> Self {
        NutritionError::ImageDecode {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for NutritionError {
    fn from(err: std::io::Error) -> Self {
        NutritionError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<GenerationFailure> for NutritionError {
    fn from(failure: GenerationFailure) -> Self {
        NutritionError::GenerationService { failure }
    }
}

/// Result type alias for nutrilens operations
pub type Result<T> = std::result::Result<T, NutritionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_errors_keep_error_prefix() {
        let err: NutritionError = GenerationFailure::Transport("connection refused".into()).into();
        assert_eq!(err.to_string(), "Error: connection refused");
    }

    #[test]
    fn iteration_error_names_iteration_and_stage() {
        let err = NutritionError::Iteration {
            iteration: 3,
            source: Box::new(NutritionError::ClassificationService {
                message: "Model does not exist".into(),
            }),
        };
        assert!(err.to_string().contains("iteration 3"));
        assert!(err.to_string().contains("Model does not exist"));
        assert_eq!(err.stage(), "classify");
    }
}
