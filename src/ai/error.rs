use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("no language model is configured")]
    NotConfigured,
    /// Transient: network failures, rate limits and 5xx responses. Safe to retry.
    #[error("language model service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("language model service error: {0}")]
    ServiceError(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::ServiceUnavailable(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            LlmError::ServiceError(format!("invalid response body: {}", error))
        } else {
            LlmError::ServiceUnavailable(error.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(error: serde_json::Error) -> Self {
        LlmError::ServiceError(format!("JSON error: {}", error))
    }
}
