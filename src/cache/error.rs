use std::time::Duration;

/// Failures surfaced by `CredentialCache::get_value`.
///
/// Cloneable so a single refresh outcome can be handed to every caller that
/// joined the same refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("no refresh operation configured for credential '{credential}'")]
    RefreshNotConfigured { credential: String },

    #[error("refresh of credential '{credential}' failed: {reason}")]
    UpstreamRefreshFailed { credential: String, reason: String },

    #[error("refresh of credential '{credential}' returned an unrecognised payload: {payload}")]
    MalformedRefreshResult { credential: String, payload: String },

    #[error("refresh of credential '{credential}' did not settle within {timeout:?}")]
    RefreshTimedOut { credential: String, timeout: Duration },
}

impl CacheError {
    /// Transient failures a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::UpstreamRefreshFailed { .. } | CacheError::RefreshTimedOut { .. }
        )
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CacheError::RefreshNotConfigured { .. } => "not_configured",
            CacheError::UpstreamRefreshFailed { .. } => "upstream",
            CacheError::MalformedRefreshResult { .. } => "malformed",
            CacheError::RefreshTimedOut { .. } => "timeout",
        }
    }

    pub fn credential(&self) -> &str {
        match self {
            CacheError::RefreshNotConfigured { credential }
            | CacheError::UpstreamRefreshFailed { credential, .. }
            | CacheError::MalformedRefreshResult { credential, .. }
            | CacheError::RefreshTimedOut { credential, .. } => credential,
        }
    }
}
