pub mod aggregator;
pub mod clients;
pub mod config;
pub mod error;
pub mod estimation;
pub mod normalizer;
pub mod prompts;
pub mod response;
pub mod schemas;
pub mod storage;

pub use aggregator::{EstimationReport, FailurePolicy, SampleAggregator, aggregate};
pub use error::{NutritionError, Result};
pub use schemas::{AggregateEstimate, Concept, NutritionSample};

