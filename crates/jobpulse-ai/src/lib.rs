mod classifier;
mod completion;
mod error;
mod extract;

pub use classifier::{fallback_records, Classifier};
pub use completion::{ChatCompletionsBackend, CompletionBackend, CompletionRequest};
pub use error::AiError;
pub use extract::{extract_json_array, parse_json_array, ExtractionError};
