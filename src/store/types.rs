use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("corrupt value under {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("increment of {key}/{field} overflows")]
    Overflow { key: String, field: String },
}

impl StoreError {
    pub fn codec(key: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Codec { key: key.into(), reason: reason.to_string() }
    }
}

impl StoreError {
    pub fn overflow(key: &str, field: &str) -> Self {
        StoreError::Overflow { key: key.to_string(), field: field.to_string() }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
