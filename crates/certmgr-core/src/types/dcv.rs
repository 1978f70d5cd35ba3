use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::CertManagerError;

/// Domain control validation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMethod {
    /// DNS CNAME record published by the requester
    Cname,
    /// Approval mail sent to a domain contact
    Email,
    /// File served over plain HTTP
    Http,
    /// File served over HTTPS
    Https,
}

impl ValidationMethod {
    /// Every method, in the order submission passes run
    pub const ALL: [Self; 4] = [Self::Cname, Self::Email, Self::Http, Self::Https];

    /// API path segment for this method
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cname => "cname",
            Self::Email => "email",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Whether the proof can be checked by the client before submitting
    #[must_use]
    pub const fn is_self_verifiable(self) -> bool {
        matches!(self, Self::Cname)
    }
}

impl fmt::Display for ValidationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationMethod {
    type Err = CertManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cname" => Ok(Self::Cname),
            "email" => Ok(Self::Email),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(CertManagerError::InvalidValidationMethod(other.to_string())),
        }
    }
}

impl TryFrom<&str> for ValidationMethod {
    type Error = CertManagerError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for ValidationMethod {
    type Error = CertManagerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Validation state of a domain as reported by the API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DcvStatus {
    /// Domain control has been proven
    Validated,
    /// No valid DCV on record
    NotValidated,
    /// A previous validation lapsed
    Expired,
    /// Value this client does not know about
    Unknown(String),
}

impl From<String> for DcvStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "VALIDATED" => Self::Validated,
            "NOT_VALIDATED" => Self::NotValidated,
            "EXPIRED" => Self::Expired,
            _ => Self::Unknown(s),
        }
    }
}

impl From<DcvStatus> for String {
    fn from(status: DcvStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for DcvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validated => f.write_str("VALIDATED"),
            Self::NotValidated => f.write_str("NOT_VALIDATED"),
            Self::Expired => f.write_str("EXPIRED"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// State of the DCV order for a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DcvOrderStatus {
    /// No challenge has been requested
    NotInitiated,
    /// Challenge started, proof not yet submitted
    AwaitingSubmission,
    /// Proof submitted, CA is checking it
    Submitted,
    /// Value this client does not know about
    Unknown(String),
}

impl From<String> for DcvOrderStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "NOT_INITIATED" => Self::NotInitiated,
            "AWAITING_SUBMISSION" => Self::AwaitingSubmission,
            "SUBMITTED" => Self::Submitted,
            _ => Self::Unknown(s),
        }
    }
}

impl From<DcvOrderStatus> for String {
    fn from(status: DcvOrderStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for DcvOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitiated => f.write_str("NOT_INITIATED"),
            Self::AwaitingSubmission => f.write_str("AWAITING_SUBMISSION"),
            Self::Submitted => f.write_str("SUBMITTED"),
            Self::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// One record returned by the validation search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainValidation {
    /// Domain name as registered with the CA
    pub domain: String,

    /// Current validation state
    #[serde(default)]
    pub dcv_status: Option<DcvStatus>,

    /// Current DCV order state
    #[serde(default)]
    pub dcv_order_status: Option<DcvOrderStatus>,

    /// Method used for the last validation, if any
    #[serde(default)]
    pub dcv_method: Option<String>,

    /// Validation expiry, as sent by the API
    #[serde(default)]
    pub expiration_date: Option<String>,
}

impl DomainValidation {
    /// Parse the expiration date, if present and well formed
    #[must_use]
    pub fn expires_on(&self) -> Option<NaiveDate> {
        parse_date(self.expiration_date.as_deref()?)
    }
}

/// Response from the validation status endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcvState {
    /// Validation state
    #[serde(default)]
    pub status: Option<DcvStatus>,

    /// DCV order state
    #[serde(default)]
    pub order_status: Option<DcvOrderStatus>,

    /// Validation expiry
    #[serde(default)]
    pub expiration_date: Option<String>,
}

impl DcvState {
    /// Returns true if the domain is currently validated
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.status == Some(DcvStatus::Validated)
    }

    /// Parse the expiration date, if present and well formed
    #[must_use]
    pub fn expires_on(&self) -> Option<NaiveDate> {
        parse_date(self.expiration_date.as_deref()?)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Some responses carry a time component; the date prefix is what matters.
    NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok()
}

/// Challenge parameters returned when a DCV is started
///
/// Which fields are filled depends on the method: `host`/`point` for
/// CNAME, `emails` for email, `url` and the two lines for HTTP(S).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedChallenge {
    /// DNS label the CNAME must be published under
    #[serde(default)]
    pub host: Option<String>,

    /// Target the CNAME must point at
    #[serde(default)]
    pub point: Option<String>,

    /// Addresses the approval mail can be sent to
    #[serde(default)]
    pub emails: Vec<String>,

    /// URL the validation file must be served from
    #[serde(default)]
    pub url: Option<String>,

    /// First line of the validation file
    #[serde(default)]
    pub first_line: Option<String>,

    /// Second line of the validation file
    #[serde(default)]
    pub second_line: Option<String>,
}

/// Response from the submit endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    /// Validation state after submission
    #[serde(default)]
    pub status: Option<DcvStatus>,

    /// DCV order state after submission
    #[serde(default)]
    pub order_status: Option<DcvOrderStatus>,

    /// Free form message from the CA
    #[serde(default)]
    pub message: Option<String>,
}

/// Progress of one challenge within a validation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    /// Selected but not yet started
    NotStarted,
    /// Challenge started at the CA
    Started,
    /// Proof observed by the client, submission not yet accepted
    Verified,
    /// Proof submitted to the CA
    Submitted,
    /// Start request failed
    Failed,
}

impl ChallengeStatus {
    /// Returns true while the challenge still needs work
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Started | Self::Verified)
    }
}

/// A started challenge tracked by a validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationChallenge {
    /// Domain being validated
    pub domain: String,
    /// Method the challenge was started with
    pub method: ValidationMethod,
    /// Progress within the run
    pub status: ChallengeStatus,
    /// Method specific parameters from the CA
    #[serde(flatten)]
    pub details: StartedChallenge,
}

impl ValidationChallenge {
    /// Create a challenge from a start response
    #[must_use]
    pub fn started(
        domain: impl Into<String>,
        method: ValidationMethod,
        details: StartedChallenge,
    ) -> Self {
        Self {
            domain: domain.into(),
            method,
            status: ChallengeStatus::Started,
            details,
        }
    }

    /// Record a domain whose start request failed
    #[must_use]
    pub fn failed(domain: impl Into<String>, method: ValidationMethod) -> Self {
        Self {
            domain: domain.into(),
            method,
            status: ChallengeStatus::Failed,
            details: StartedChallenge::default(),
        }
    }

    /// CNAME label, if this is a CNAME challenge
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.details.host.as_deref()
    }

    /// CNAME target, if this is a CNAME challenge
    #[must_use]
    pub fn point(&self) -> Option<&str> {
        self.details.point.as_deref()
    }
}

/// Typed search filter for the validation endpoint
///
/// Each field maps to a fixed API parameter; paging parameters are
/// handled by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFilter {
    /// Exact domain name
    pub domain: Option<String>,
    /// Organization ID
    pub org_id: Option<u64>,
    /// Department ID
    pub department: Option<u64>,
    /// Validation state
    pub dcv_status: Option<DcvStatus>,
    /// DCV order state
    pub order_status: Option<DcvOrderStatus>,
    /// Validation expires within this many days
    pub expires_in: Option<u32>,
}

impl ValidationFilter {
    /// Create an empty filter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Domains that were never validated and have no DCV order yet
    #[must_use]
    pub fn awaiting_validation() -> Self {
        Self::new()
            .dcv_status(DcvStatus::NotValidated)
            .order_status(DcvOrderStatus::NotInitiated)
    }

    /// Filter by domain
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Filter by organization
    #[must_use]
    pub const fn org_id(mut self, org_id: u64) -> Self {
        self.org_id = Some(org_id);
        self
    }

    /// Filter by department
    #[must_use]
    pub const fn department(mut self, department: u64) -> Self {
        self.department = Some(department);
        self
    }

    /// Filter by validation state
    #[must_use]
    pub fn dcv_status(mut self, status: DcvStatus) -> Self {
        self.dcv_status = Some(status);
        self
    }

    /// Filter by DCV order state
    #[must_use]
    pub fn order_status(mut self, status: DcvOrderStatus) -> Self {
        self.order_status = Some(status);
        self
    }

    /// Only domains whose validation expires within `days`
    #[must_use]
    pub const fn expires_in(mut self, days: u32) -> Self {
        self.expires_in = Some(days);
        self
    }

    /// Returns true if no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Translate into API query parameters
    #[must_use]
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ref domain) = self.domain {
            params.push(("domain", domain.clone()));
        }
        if let Some(org_id) = self.org_id {
            params.push(("org_id", org_id.to_string()));
        }
        if let Some(department) = self.department {
            params.push(("department", department.to_string()));
        }
        if let Some(ref status) = self.dcv_status {
            params.push(("dcvStatus", status.to_string()));
        }
        if let Some(ref status) = self.order_status {
            params.push(("orderStatus", status.to_string()));
        }
        if let Some(days) = self.expires_in {
            params.push(("expiresIn", days.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_rejects_unknown_names() {
        assert_eq!("cname".parse::<ValidationMethod>().unwrap(), ValidationMethod::Cname);
        assert_eq!(ValidationMethod::try_from("https").unwrap(), ValidationMethod::Https);

        for bad in ["CNAME", "dns", "", "txt", "http "] {
            let err = bad.parse::<ValidationMethod>().unwrap_err();
            assert!(matches!(err, CertManagerError::InvalidValidationMethod(ref m) if m == bad));
        }
    }

    #[test]
    fn statuses_keep_unknown_values() {
        let s: DcvStatus = serde_json::from_str(r#""VALIDATED""#).unwrap();
        assert_eq!(s, DcvStatus::Validated);

        let s: DcvStatus = serde_json::from_str(r#""PENDING_REVIEW""#).unwrap();
        assert_eq!(s, DcvStatus::Unknown("PENDING_REVIEW".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), r#""PENDING_REVIEW""#);
    }

    #[test]
    fn default_filter_translates_to_api_names() {
        let params = ValidationFilter::awaiting_validation().to_query();
        assert_eq!(
            params,
            vec![
                ("dcvStatus", "NOT_VALIDATED".to_string()),
                ("orderStatus", "NOT_INITIATED".to_string()),
            ]
        );
    }

    #[test]
    fn full_filter_translation_table() {
        let filter = ValidationFilter::new()
            .domain("example.com")
            .org_id(5)
            .department(9)
            .expires_in(30);
        let keys: Vec<_> = filter.to_query().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["domain", "org_id", "department", "expiresIn"]);
        assert!(!filter.is_empty());
        assert!(ValidationFilter::new().is_empty());
    }

    #[test]
    fn domain_record_parses_expiry() {
        let rec: DomainValidation = serde_json::from_str(
            r#"{"domain": "example.com", "dcvStatus": "VALIDATED",
                "dcvOrderStatus": "SUBMITTED", "expirationDate": "2027-03-01"}"#,
        )
        .unwrap();
        assert_eq!(rec.dcv_status, Some(DcvStatus::Validated));
        assert_eq!(rec.dcv_order_status, Some(DcvOrderStatus::Submitted));
        assert_eq!(rec.expires_on(), NaiveDate::from_ymd_opt(2027, 3, 1));
    }

    #[test]
    fn challenge_flattens_cname_details() {
        let details: StartedChallenge = serde_json::from_str(
            r#"{"host": "_abc.example.com.", "point": "xyz.dcv.example.net."}"#,
        )
        .unwrap();
        let challenge = ValidationChallenge::started("example.com", ValidationMethod::Cname, details);
        assert_eq!(challenge.host(), Some("_abc.example.com."));
        assert_eq!(challenge.point(), Some("xyz.dcv.example.net."));
        assert!(challenge.status.is_outstanding());

        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["domain"], "example.com");
        assert_eq!(json["method"], "cname");
        assert_eq!(json["host"], "_abc.example.com.");
    }
}
