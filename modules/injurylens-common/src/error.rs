use thiserror::Error;

#[derive(Error, Debug)]
pub enum InjuryLensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permanent item source error: {0}")]
    SourcePermanent(String),

    #[error("Item source unreachable: all {queries} queries failed (last error: {last_error})")]
    SourceUnreachable { queries: usize, last_error: String },

    #[error("Permanent label service error: {0}")]
    LabelServicePermanent(String),

    #[error("Label service unreachable for {consecutive} consecutive items (last error: {last_error})")]
    LabelServiceUnreachable { consecutive: u32, last_error: String },

    #[error("Output error: {0}")]
    Output(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Failure of a single call to an external collaborator (content search or
/// label service), already classified for the retry layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Rate limit, timeout, connection reset, 5xx. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// Auth failure, malformed request. Retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),

    /// The service answered but the answer was unusable.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, CallError::Permanent(_))
    }
}
