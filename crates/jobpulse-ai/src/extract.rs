use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("reply contains no JSON array")]
    NoArray,
    #[error("JSON array is never closed (truncated reply)")]
    Unterminated,
    #[error("JSON decode failed: {0}")]
    Decode(String),
    #[error("top-level JSON value is not an array")]
    NotAnArray,
}

/// Locates the first bracket-balanced `[...]` span in free text.
///
/// Scanning starts at the first `[`; depth goes up on `[` and down on `]`,
/// and the span ends where depth first returns to zero. Brackets inside
/// string literals are counted like any other, so a reply whose strings
/// contain unbalanced brackets fails to decode and degrades upstream.
pub fn extract_json_array(text: &str) -> Result<&str, ExtractionError> {
    let start = text.find('[').ok_or(ExtractionError::NoArray)?;

    let mut depth = 0_usize;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    Err(ExtractionError::Unterminated)
}

pub fn parse_json_array(text: &str) -> Result<Vec<Value>, ExtractionError> {
    let candidate = extract_json_array(text)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(ExtractionError::NotAnArray),
        Err(err) => Err(ExtractionError::Decode(err.to_string())),
    }
}
