use std::time::Duration;
use thiserror::Error;

/// Result type alias for DNS lookups
pub type DnsResult<T> = std::result::Result<T, DnsError>;

/// Errors from CNAME lookups
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// The name does not exist or has no CNAME record
    #[error("no CNAME record for {0}")]
    NotFound(String),

    /// The lookup did not finish in time
    #[error("CNAME lookup for {host} timed out after {after:?}")]
    Timeout {
        /// Name that was queried
        host: String,
        /// Configured lookup timeout
        after: Duration,
    },

    /// Any other resolver failure (SERVFAIL, refused, network errors)
    #[error("resolver error: {0}")]
    Resolver(String),

    /// The system resolver configuration could not be loaded
    #[error("failed to create resolver: {0}")]
    Init(String),
}

impl DnsError {
    /// Returns true if the record is simply not there (yet)
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<DnsError> for certmgr_core::CertManagerError {
    fn from(err: DnsError) -> Self {
        match err {
            DnsError::Timeout { .. } => Self::Timeout(err.to_string()),
            DnsError::NotFound(_) | DnsError::Resolver(_) | DnsError::Init(_) => {
                Self::Dns(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certmgr_core::CertManagerError;

    #[test]
    fn converts_into_crate_error() {
        let err: CertManagerError = DnsError::Timeout {
            host: "_x.example.com".into(),
            after: Duration::from_secs(5),
        }
        .into();
        assert!(err.is_retryable());

        let err: CertManagerError = DnsError::Init("no resolv.conf".into()).into();
        assert!(matches!(err, CertManagerError::Dns(ref m) if m.contains("resolv.conf")));
    }

    #[test]
    fn only_missing_records_are_not_found() {
        assert!(DnsError::NotFound("_x.example.com".into()).is_not_found());
        assert!(!DnsError::Resolver("SERVFAIL".into()).is_not_found());
    }
}
