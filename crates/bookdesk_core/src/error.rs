use std::fmt;

/// Fatal failure categories. Everything else a run can hit is recorded in its
/// report and logged instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// TOC, credentials or build output are unusable. Raised before any remote write.
    Config(String),
    /// The authenticated help-center user may not manage articles.
    Authorization(String),
    /// A category or section could not be resolved or created.
    RemoteResource(String),
}

impl SyncError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Authorization(_) => "authorization",
            Self::RemoteResource(_) => "remote_resource",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Config(message) | Self::Authorization(message) | Self::RemoteResource(message) => {
                message
            }
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(message) => write!(f, "configuration error: {message}"),
            Self::Authorization(message) => write!(f, "authorization error: {message}"),
            Self::RemoteResource(message) => write!(f, "remote resource error: {message}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Find the fatal category anywhere in an error chain.
pub fn sync_error_of(error: &anyhow::Error) -> Option<&SyncError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{SyncError, sync_error_of};

    #[test]
    fn sync_error_survives_added_context() {
        let error = Err::<(), _>(SyncError::Authorization("role is agent".to_string()))
            .context("preflight")
            .expect_err("must fail");
        let found = sync_error_of(&error).expect("typed error in chain");
        assert_eq!(found.kind(), "authorization");
        assert_eq!(found.message(), "role is agent");
    }

    #[test]
    fn plain_errors_have_no_category() {
        let error = anyhow::anyhow!("socket closed");
        assert!(sync_error_of(&error).is_none());
    }
}
