// Error taxonomy shared by discovery and serving

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a request was refused by access control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    IpDenied,
    AuthRequired,
    AuthFailed,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::IpDenied => "ip_denied",
            DenyReason::AuthRequired => "auth_required",
            DenyReason::AuthFailed => "auth_failed",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("upstream unavailable for '{target}': {reason}")]
    UpstreamUnavailable { target: String, reason: String },

    #[error("failed to write config '{}': {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    #[error("rate limit exceeded for {ip}")]
    RateLimitExceeded { ip: String },

    #[error("too many concurrent downloads")]
    ConcurrencyCapped,

    #[error("corrupted artifact '{}': {reason}", path.display())]
    CorruptedArtifact { path: PathBuf, reason: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl MirrorError {
    pub fn config_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MirrorError::ConfigWrite {
            path: path.into(),
            source,
        }
    }

    /// HTTP status a client sees for this error
    pub fn status_code(&self) -> u16 {
        match self {
            MirrorError::UpstreamUnavailable { .. } => 502,
            MirrorError::ConfigWrite { .. } => 500,
            MirrorError::AccessDenied(DenyReason::IpDenied) => 403,
            MirrorError::AccessDenied(_) => 401,
            MirrorError::RateLimitExceeded { .. } => 429,
            MirrorError::ConcurrencyCapped => 503,
            MirrorError::CorruptedArtifact { .. } => 404,
            MirrorError::NotFound(_) => 404,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MirrorError::AccessDenied(DenyReason::IpDenied).status_code(), 403);
        assert_eq!(MirrorError::AccessDenied(DenyReason::AuthRequired).status_code(), 401);
        assert_eq!(MirrorError::AccessDenied(DenyReason::AuthFailed).status_code(), 401);
        assert_eq!(
            MirrorError::RateLimitExceeded { ip: "1.2.3.4".into() }.status_code(),
            429
        );
        assert_eq!(MirrorError::ConcurrencyCapped.status_code(), 503);
        assert_eq!(
            MirrorError::CorruptedArtifact {
                path: "x.tar".into(),
                reason: "bad marker".into()
            }
            .status_code(),
            404
        );
    }

    #[test]
    fn test_deny_reason_labels() {
        assert_eq!(DenyReason::IpDenied.to_string(), "ip_denied");
        assert_eq!(DenyReason::AuthRequired.to_string(), "auth_required");
        assert_eq!(DenyReason::AuthFailed.to_string(), "auth_failed");
    }
}
