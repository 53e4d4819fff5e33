use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run failed with status: {0}")]
    RunFailed(String),
}

impl ApifyError {
    /// Whether retrying the same request later could succeed.
    ///
    /// Network failures, rate limits, request timeouts and 5xx responses are
    /// transient. Auth failures and malformed input are not. A run that Apify
    /// reports as `TIMED-OUT` is worth another attempt; `FAILED`/`ABORTED` are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApifyError::Network(_) => true,
            ApifyError::Api { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            ApifyError::Parse(_) => false,
            ApifyError::RunFailed(status) => status == "TIMED-OUT",
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        ApifyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> ApifyError {
        ApifyError::Api {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(api(429).is_transient());
        assert!(api(408).is_transient());
        assert!(api(502).is_transient());
        assert!(ApifyError::Network("reset".into()).is_transient());
    }

    #[test]
    fn auth_and_input_errors_are_permanent() {
        assert!(!api(401).is_transient());
        assert!(!api(400).is_transient());
        assert!(!ApifyError::Parse("bad json".into()).is_transient());
        assert!(!ApifyError::RunFailed("FAILED".into()).is_transient());
        assert!(ApifyError::RunFailed("TIMED-OUT".into()).is_transient());
    }
}
