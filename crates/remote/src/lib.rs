pub mod extract;
pub mod inference;

pub use extract::{extract_content, FetchError, TextExtractor, DEFAULT_EXTRACTOR_ENDPOINT};
pub use inference::{InferenceClient, InferenceConfig};
