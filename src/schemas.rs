//! Data model shared across the estimation pipeline

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the generative model is instructed to return, in output order.
pub const NUTRITION_KEYS: [&str; 5] = ["name", "calories", "carbohydrates", "protein", "fat"];

/// A (label, confidence) pair reported by the image classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub confidence: f32,
}

impl Concept {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// One decoded model answer. Values are kept exactly as the model wrote them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NutritionSample {
    fields: Map<String, Value>,
}

/// Per-field mean-then-ceiling over the contributing samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateEstimate {
    fields: Map<String, Value>,
}

macro_rules! nutrition_accessors {
    ($ty:ty) => {
        impl $ty {
            pub fn from_map(fields: Map<String, Value>) -> Self {
                Self { fields }
            }

            pub fn fields(&self) -> &Map<String, Value> {
                &self.fields
            }

            pub fn into_fields(self) -> Map<String, Value> {
                self.fields
            }

            pub fn get(&self, key: &str) -> Option<&Value> {
                self.fields.get(key)
            }

            pub fn name(&self) -> Option<&str> {
                self.get("name").and_then(Value::as_str)
            }

            pub fn calories(&self) -> Option<f64> {
                self.get("calories").and_then(Value::as_f64)
            }

            pub fn carbohydrates(&self) -> Option<f64> {
                self.get("carbohydrates").and_then(Value::as_f64)
            }

            pub fn protein(&self) -> Option<f64> {
                self.get("protein").and_then(Value::as_f64)
            }

            pub fn fat(&self) -> Option<f64> {
                self.get("fat").and_then(Value::as_f64)
            }
        }
    };
}

nutrition_accessors!(NutritionSample);
nutrition_accessors!(AggregateEstimate);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sample_serializes_as_plain_object_in_key_order() {
        let Value::Object(map) = json!({
            "name": "Pizza",
            "calories": 300,
            "carbohydrates": 33,
            "protein": 12,
            "fat": 15
        }) else {
            unreachable!()
        };
        let sample = NutritionSample::from_map(map);
        assert_eq!(
            serde_json::to_string(&sample).unwrap(),
            r#"{"name":"Pizza","calories":300,"carbohydrates":33,"protein":12,"fat":15}"#
        );
        assert_eq!(sample.name(), Some("Pizza"));
        assert_eq!(sample.calories(), Some(300.0));
    }

    #[test]
    fn non_numeric_values_are_not_coerced() {
        let Value::Object(map) = json!({"name": "Soup", "calories": "about 200"}) else {
            unreachable!()
        };
        let sample = NutritionSample::from_map(map);
        assert_eq!(sample.calories(), None);
        assert_eq!(sample.get("calories"), Some(&json!("about 200")));
    }
}
