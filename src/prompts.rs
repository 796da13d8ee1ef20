//! Prompt construction for the generative model and the success-marker convention.
//!
//! The reply contract is textual: a first line containing `success`, then one JSON
//! object with exactly the keys in [`NUTRITION_KEYS`]. [`has_success_marker`] is the
//! only place that interprets the marker, and [`crate::response`] is the only place
//! that interprets the object.

use crate::schemas::{Concept, NUTRITION_KEYS};

/// Literal token required on the first line of a well-formed reply.
pub const SUCCESS_MARKER: &str = "success";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.89;
pub const DEFAULT_MAX_CONCEPTS: usize = 2;

/// True when the first line of `text`, lower-cased, contains the success marker.
pub fn has_success_marker(text: &str) -> bool {
    first_line(text).to_lowercase().contains(SUCCESS_MARKER)
}

/// First line of the trimmed reply.
pub fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or_default()
}

/// Keeps concepts strictly above `threshold`, then the `limit` most confident.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConceptFilter {
    pub threshold: f32,
    pub limit: usize,
}

impl Default for ConceptFilter {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            limit: DEFAULT_MAX_CONCEPTS,
        }
    }
}

impl ConceptFilter {
    pub fn new(threshold: f32, limit: usize) -> Self {
        Self { threshold, limit }
    }

    /// The classifier's ranking is not trusted to be sorted; selection sorts
    /// explicitly and the stable sort keeps classifier order among ties.
    pub fn apply(&self, concepts: &[Concept]) -> Vec<Concept> {
        let mut kept: Vec<Concept> = concepts
            .iter()
            .filter(|c| c.confidence > self.threshold)
            .cloned()
            .collect();
        kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        kept.truncate(self.limit);
        kept
    }
}

/// Instruction text for one generative call.
#[derive(Debug, PartialEq, Eq)]
pub struct EstimationPrompt {
    text: String,
}

impl EstimationPrompt {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    filter: ConceptFilter,
}

impl PromptBuilder {
    pub fn new(filter: ConceptFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &ConceptFilter {
        &self.filter
    }

    /// Filter the classifier output and render the instruction around it.
    pub fn build(&self, concepts: &[Concept]) -> EstimationPrompt {
        let kept = self.filter.apply(concepts);
        EstimationPrompt {
            text: render(&kept),
        }
    }
}

fn render(concepts: &[Concept]) -> String {
    let listed = if concepts.is_empty() {
        "(none recognized with high confidence; rely on the photo alone)".to_string()
    } else {
        concepts
            .iter()
            .map(|c| format!("{} {:.2}", c.name, c.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let shape = format!(
        "{{\"{}\": \"<dish name>\", \"{}\": <number>, \"{}\": <number>, \"{}\": <number>, \"{}\": <number>}}",
        NUTRITION_KEYS[0], NUTRITION_KEYS[1], NUTRITION_KEYS[2], NUTRITION_KEYS[3], NUTRITION_KEYS[4]
    );

    format!(
        "Identify the single dish shown in the attached photo of a meal and estimate its nutrition facts \
(calories, carbohydrates, protein and fat, in kcal and grams).\n\
\n\
Food items detected in the photo, with classifier confidence scores:\n\
{listed}\n\
\n\
Reply in exactly this format and nothing else:\n\
{SUCCESS_MARKER}\n\
{shape}\n\
\n\
Rules:\n\
- The first line must be the word {SUCCESS_MARKER}, before anything else.\n\
- Return one food item only, as one JSON object with exactly these keys: {keys}.\n\
- Every value except name must be a single number: no ranges, no units, no text.\n\
- Do not add explanations, trailing periods, or code fences (no ``` around the JSON).\n",
        keys = NUTRITION_KEYS.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concepts() -> Vec<Concept> {
        vec![
            Concept::new("pizza", 0.97),
            Concept::new("cheese", 0.93),
            Concept::new("tomato", 0.95),
            Concept::new("bread", 0.89),
            Concept::new("salad", 0.42),
        ]
    }

    #[test]
    fn filter_keeps_top_two_strictly_above_threshold() {
        let kept = ConceptFilter::default().apply(&concepts());
        let names: Vec<&str> = kept.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pizza", "tomato"]);
    }

    #[test]
    fn filter_never_fabricates_or_exceeds_limit() {
        let input = concepts();
        for limit in 0..4 {
            let kept = ConceptFilter::new(0.5, limit).apply(&input);
            assert!(kept.len() <= limit);
            assert!(kept.iter().all(|c| c.confidence > 0.5 && input.contains(c)));
        }
    }

    #[test]
    fn ties_keep_classifier_order() {
        let input = vec![
            Concept::new("rice", 0.95),
            Concept::new("curry", 0.95),
            Concept::new("naan", 0.95),
        ];
        let kept = ConceptFilter::default().apply(&input);
        assert_eq!(kept, input[..2].to_vec());
    }

    #[test]
    fn prompt_lists_filtered_concepts_and_contract() {
        let prompt = PromptBuilder::default().build(&concepts());
        let text = prompt.as_str();
        assert!(text.contains("pizza 0.97, tomato 0.95"));
        assert!(!text.contains("cheese"));
        assert!(!text.contains("salad"));
        for key in NUTRITION_KEYS {
            assert!(text.contains(&format!("\"{key}\"")));
        }
        assert!(text.contains("\nsuccess\n"));
    }

    #[test]
    fn prompt_without_concepts_still_states_contract() {
        let prompt = PromptBuilder::default().build(&[Concept::new("plate", 0.3)]);
        assert!(prompt.as_str().contains("none recognized"));
        assert!(prompt.as_str().contains(SUCCESS_MARKER));
    }

    #[test]
    fn success_marker_checks_first_line_only() {
        assert!(has_success_marker("success:\n{\"name\": \"Salad\"}"));
        assert!(has_success_marker("  SUCCESS\n{}"));
        assert!(!has_success_marker("Here you go\nsuccess\n{}"));
        assert!(!has_success_marker(""));
    }
}
