//! Error types for Dayline

use thiserror::Error;

/// Errors that can occur while building timelines.
///
/// Insufficient or low-quality input is deliberately *not* represented here:
/// the movement classifier reports it as a null classification and the fusion
/// stages degrade to low-confidence output instead of failing.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("Upstream fetch failed for {source_name}: {message}")]
    UpstreamFetch {
        /// Which collaborator failed, e.g. "location" or "calendar"
        source_name: &'static str,
        message: String,
    },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Checkpoint store error: {0}")]
    CheckpointError(String),

    #[error("Ingestion already running for user: {0}")]
    ConcurrentRun(String),

    #[error("Invalid window bounds: {0}")]
    InvalidWindow(String),
}

impl FusionError {
    /// Shorthand for an upstream fetch failure.
    pub fn upstream(source_name: &'static str, message: impl Into<String>) -> Self {
        FusionError::UpstreamFetch {
            source_name,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_display_names_the_collaborator() {
        let err = FusionError::upstream("communications", "store offline");
        assert_eq!(
            err.to_string(),
            "Upstream fetch failed for communications: store offline"
        );
        // Leaf error: nothing chained underneath
        assert!(std::error::Error::source(&err).is_none());
    }
}
