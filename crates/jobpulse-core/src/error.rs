use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid user key: {0}")]
    InvalidUserKey(String),
}
