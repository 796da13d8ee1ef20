pub mod clarifai;
pub mod openai;
pub mod traits;

pub use clarifai::ClarifaiClassifier;
pub use openai::OpenAiGenerator;
pub use traits::{ConceptSource, TextGenerator};
