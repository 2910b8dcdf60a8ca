use thiserror::Error;

/// Typed remote-store errors enabling retry classification.
///
/// `is_transient()` distinguishes failures worth re-driving automatically
/// (network drops, timeouts) from ones that need outside intervention
/// (bad credentials, exhausted quota). Both land a file in a `*Failed`
/// state; only transient ones are picked up by the next reconcile pass.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error talking to the remote store: {0}")]
    Network(String),

    #[error("remote operation timed out: {0}")]
    Timeout(String),

    /// Missing or invalid credentials. Never retried silently; the IPC
    /// login flow is the only way out of this state.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("storage quota exceeded: {0}")]
    Quota(String),

    #[error("remote file not found: {0}")]
    NotFound(String),

    #[error("remote store error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Whether this error is transient and eligible for state-machine-driven
    /// retry on the next reconciliation pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_is_transient() {
        assert!(RemoteError::Network("reset".into()).is_transient());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(RemoteError::Timeout("30s".into()).is_transient());
    }

    #[test]
    fn auth_is_permanent() {
        assert!(!RemoteError::Auth("no keys".into()).is_transient());
    }

    #[test]
    fn quota_is_permanent() {
        assert!(!RemoteError::Quota("full".into()).is_transient());
    }

    #[test]
    fn not_found_is_permanent() {
        assert!(!RemoteError::NotFound("a.txt".into()).is_transient());
    }
}
