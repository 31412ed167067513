//! Error taxonomy for the harvester.

/// Classified failures. Everything except `Config` is recoverable and
/// handled at the listing or page boundary.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("blocked by an authentication or verification wall at {url}")]
    Blocked { url: String },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarvestError {
    /// Short label used in logs and the run journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::Navigation { .. } => "navigation",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
        }
    }
}

/// Classify an arbitrary error for logging.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<HarvestError>()
        .map(HarvestError::kind)
        .unwrap_or("extraction")
}
