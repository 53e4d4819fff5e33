use thiserror::Error;

pub type Result<T> = std::result::Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty completion from model")]
    EmptyResponse,
}

impl AiError {
    /// Network failures, timeouts, rate limits and 5xx responses can succeed
    /// on a later attempt. Everything else needs a different request.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Network(_) => true,
            AiError::Api { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            AiError::Config(_) | AiError::Parse(_) | AiError::EmptyResponse => false,
        }
    }

    /// The request reached the service but the answer was unusable.
    pub fn is_malformed(&self) -> bool {
        matches!(self, AiError::Parse(_) | AiError::EmptyResponse)
    }

    /// A 400 that names `response_format` means the model does not support
    /// JSON mode and the request can be resent without it.
    pub fn rejects_response_format(&self) -> bool {
        matches!(self, AiError::Api { status: 400, message } if message.contains("response_format"))
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        AiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for AiError {
    fn from(e: serde_json::Error) -> Self {
        AiError::Parse(e.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for AiError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        AiError::Config(format!("invalid API key header: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        let api = |status| AiError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(503).is_transient());
        assert!(!api(401).is_transient());
        assert!(!api(400).is_transient());
        assert!(AiError::EmptyResponse.is_malformed());
        assert!(!AiError::EmptyResponse.is_transient());
    }

    #[test]
    fn detects_json_mode_rejection() {
        let err = AiError::Api {
            status: 400,
            message: "Invalid parameter: 'response_format' of type 'json_object' is not supported"
                .into(),
        };
        assert!(err.rejects_response_format());
        let other = AiError::Api {
            status: 400,
            message: "max_tokens too large".into(),
        };
        assert!(!other.rejects_response_format());
    }
}
