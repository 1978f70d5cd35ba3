use std::convert::Infallible;

use thiserror::Error;

/// Result type alias for certificate manager operations
pub type Result<T> = std::result::Result<T, CertManagerError>;

/// Errors that can occur when talking to the certificate manager API
#[derive(Error, Debug)]
pub enum CertManagerError {
    /// DCV method is not one of cname, email, http, https
    #[error("invalid validation method: {0:?}")]
    InvalidValidationMethod(String),

    /// Certificate type name is not in the fetched catalog
    #[error("incorrect certificate type specified: {0:?}")]
    UnknownCertType(String),

    /// Term is not allowed for the requested certificate type
    #[error("incorrect term specified: {term}. Valid terms are {}", join_terms(.valid))]
    InvalidTerm {
        /// Requested term in days
        term: u32,
        /// Terms the certificate type accepts
        valid: Vec<u32>,
    },

    /// Replacement or revocation reason violates the server's length limit
    #[error("invalid reason: {0}")]
    InvalidReason(String),

    /// Revocation reason code outside the accepted set
    #[error("reason code must be one of: 0, 1, 3, 4, 5 (got {0})")]
    InvalidReasonCode(u8),

    /// Two mutually exclusive identifiers were supplied
    #[error("cannot provide both {0}")]
    ConflictingIdentifiers(&'static str),

    /// None of the required identifiers were supplied
    #[error("one of {0} must be given")]
    MissingIdentifier(&'static str),

    /// Custom field entry without a name or value
    #[error("invalid custom field: {0}")]
    InvalidCustomField(String),

    /// Any other malformed caller input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Certificate issuance has not finished yet
    #[error("certificate {cert_id} still in 'pending' state")]
    Pending {
        /// Certificate that was collected
        cert_id: String,
    },

    /// Certificate was revoked before it could be collected
    #[error("certificate {cert_id} in 'revoked' state")]
    Revoked {
        /// Certificate that was collected
        cert_id: String,
    },

    /// A validation run still has outstanding challenges
    #[error("{outstanding} previously started challenges are still outstanding; submit or clear them first")]
    RunInProgress {
        /// Number of outstanding challenges
        outstanding: usize,
    },

    /// Authentication failed - invalid or missing credentials
    #[error("authentication failed: invalid credentials")]
    Unauthorized,

    /// Rate limit exceeded
    #[error("rate limit exceeded, retry after {retry_after:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after: Option<u64>,
    },

    /// Resource not found
    #[error("resource not found: {resource}")]
    NotFound {
        /// Description of the resource that wasn't found
        resource: String,
    },

    /// API returned an error response
    #[error("API error ({status}, code {code:?}): {description}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Numeric error code from the JSON body
        code: Option<i64>,
        /// Error description from the API
        description: String,
    },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    Dns(String),
}

impl CertManagerError {
    /// Returns true if the error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Pending { .. }
        )
    }

    /// Returns true if the error is due to authentication
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true for input errors raised before any network call
    #[must_use]
    pub const fn is_client_side(&self) -> bool {
        matches!(
            self,
            Self::InvalidValidationMethod(_)
                | Self::UnknownCertType(_)
                | Self::InvalidTerm { .. }
                | Self::InvalidReason(_)
                | Self::InvalidReasonCode(_)
                | Self::ConflictingIdentifiers(_)
                | Self::MissingIdentifier(_)
                | Self::InvalidCustomField(_)
                | Self::InvalidArgument(_)
        )
    }

    /// Returns true if a collection found the certificate still pending
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Returns true if a collection found the certificate revoked
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        matches!(self, Self::Revoked { .. })
    }

    /// Returns the HTTP status code if this is an API error
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::NotFound { .. } => Some(404),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the API's numeric error code, if the response carried one
    #[must_use]
    pub const fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<Infallible> for CertManagerError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

fn join_terms(terms: &[u32]) -> String {
    terms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
