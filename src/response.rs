//! Structured-output extraction from free-form model replies.
//!
//! The candidate object is the span from the first `{` to the last `}`, inclusive.
//! This tolerates prose, markers and blank lines around a single object. Worst case:
//! a reply carrying two separate objects collapses into one span covering both plus
//! whatever sits between them, which fails to decode. That is reported as a format
//! error, never resolved by guessing.

use serde_json::Value;
use tracing::debug;

use crate::error::{NutritionError, Result};
use crate::schemas::NutritionSample;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Sample(NutritionSample),
    /// No `{ ... }` span exists anywhere in the reply.
    NoJson,
}

/// Locate the first-`{` / last-`}` span. One forward and one backward scan, O(len).
pub fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Decode the embedded object, distinguishing "absent" from "malformed".
pub fn parse_response(text: &str) -> Result<ParseOutcome> {
    let Some(span) = json_span(text) else {
        debug!(chars = text.len(), "no JSON span in model reply");
        return Ok(ParseOutcome::NoJson);
    };

    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(fields)) => Ok(ParseOutcome::Sample(NutritionSample::from_map(fields))),
        Ok(other) => Err(NutritionError::ResponseFormat {
            message: format!("expected a JSON object, found {other}"),
        }),
        Err(e) => Err(NutritionError::ResponseFormat {
            message: format!("invalid JSON in model reply: {e}"),
        }),
    }
}

/// Like [`parse_response`] but treats a missing object as a format error.
pub fn parse_sample(text: &str) -> Result<NutritionSample> {
    match parse_response(text)? {
        ParseOutcome::Sample(sample) => Ok(sample),
        ParseOutcome::NoJson => Err(NutritionError::ResponseFormat {
            message: "No JSON found in the string.".to_string(),
        }),
    }
}
