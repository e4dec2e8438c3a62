//! Domain-specific error types for soma-ai

use thiserror::Error;

/// Main error type for the SomaAI backend
#[derive(Error, Debug)]
pub enum SomaError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Upstream credential is not configured")]
    MissingCredential,

    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Upstream returned status {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("No JSON found in model output")]
    NoJsonFound,

    #[error("Malformed JSON in model output: {message}")]
    MalformedJson { message: String },

    /// Stage 1 of the analysis pipeline failed. `raw` holds the completion
    /// text when the failure happened after the model answered.
    #[error("Analysis failed: {source}")]
    AnalysisFailed {
        #[source]
        source: Box<SomaError>,
        raw: Option<String>,
    },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SomaError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        SomaError::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap a Stage 1 failure, keeping the raw model text if there was one.
    pub fn analysis_failed(cause: SomaError, raw: Option<String>) -> Self {
        SomaError::AnalysisFailed {
            source: Box::new(cause),
            raw,
        }
    }

    /// The innermost cause, looking through `AnalysisFailed` wrappers.
    pub fn root_cause(&self) -> &SomaError {
        match self {
            SomaError::AnalysisFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Network-level failures that callers answer with a fallback payload.
    pub fn is_soft_upstream_failure(&self) -> bool {
        matches!(self.root_cause(), SomaError::UpstreamUnavailable { .. })
    }

    /// Model answered but its text could not be turned into the expected JSON.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self.root_cause(),
            SomaError::NoJsonFound | SomaError::MalformedJson { .. }
        )
    }
}

impl From<anyhow::Error> for SomaError {
    fn from(err: anyhow::Error) -> Self {
        SomaError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SomaError {
    fn from(err: serde_json::Error) -> Self {
        SomaError::MalformedJson {
            message: err.to_string(),
        }
    }
}

/// Result type alias for SomaAI operations
pub type Result<T> = std::result::Result<T, SomaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_analysis_failures() {
        let err = SomaError::analysis_failed(
            SomaError::analysis_failed(
                SomaError::UpstreamUnavailable {
                    message: "dns".into(),
                },
                None,
            ),
            None,
        );
        assert!(matches!(
            err.root_cause(),
            SomaError::UpstreamUnavailable { .. }
        ));
        assert!(err.is_soft_upstream_failure());
        assert!(!err.is_parse_failure());
    }

    #[test]
    fn parse_failures_are_classified() {
        let err = SomaError::analysis_failed(SomaError::NoJsonFound, Some("hi".into()));
        assert!(err.is_parse_failure());
        assert!(!err.is_soft_upstream_failure());
    }
}
