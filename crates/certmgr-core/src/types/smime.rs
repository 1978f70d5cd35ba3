use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::common::{deserialize_id, deserialize_opt_id};
use crate::{CertManagerError, Result};

/// Longest reason the API accepts for replacement and revocation
pub const MAX_REASON_LEN: usize = 511;

/// API error codes meaning the certificate is still being issued
pub const PENDING_CODES: &[i64] = &[0, -183];

/// API error codes meaning the certificate was revoked
pub const REVOKED_CODES: &[i64] = &[-192];

/// A certificate type offered to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertType {
    /// Type ID sent with enrollments
    pub id: u64,

    /// Full type name
    pub name: String,

    /// Allowed terms in days
    #[serde(default)]
    pub terms: Vec<u32>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl CertType {
    /// Returns true if `term` is allowed for this type
    #[must_use]
    pub fn accepts_term(&self, term: u32) -> bool {
        self.terms.contains(&term)
    }
}

/// Certificate types indexed by name
///
/// Fetched once per lifecycle client and never refreshed.
#[derive(Debug, Clone, Default)]
pub struct CertTypeCatalog {
    types: HashMap<String, CertType>,
}

impl CertTypeCatalog {
    /// Look up a type by its full name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CertType> {
        self.types.get(name)
    }

    /// Number of types in the catalog
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Resolve a type name and check the requested term against it
    pub fn resolve(&self, name: &str, term: u32) -> Result<&CertType> {
        let cert_type = self
            .get(name)
            .ok_or_else(|| CertManagerError::UnknownCertType(name.to_string()))?;

        if !cert_type.accepts_term(term) {
            return Err(CertManagerError::InvalidTerm {
                term,
                valid: cert_type.terms.clone(),
            });
        }

        Ok(cert_type)
    }
}

impl FromIterator<CertType> for CertTypeCatalog {
    fn from_iter<I: IntoIterator<Item = CertType>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }
}

/// A custom field attached to an enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    /// Field name as configured in the account
    pub name: String,
    /// Field value
    pub value: String,
}

impl CustomField {
    /// Create a custom field
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Check that every custom field carries a name and a value.
pub fn validate_custom_fields(fields: &[CustomField]) -> Result<()> {
    for (idx, field) in fields.iter().enumerate() {
        if field.name.trim().is_empty() {
            return Err(CertManagerError::InvalidCustomField(format!(
                "entry {idx} has no name"
            )));
        }
        if field.value.is_empty() {
            return Err(CertManagerError::InvalidCustomField(format!(
                "field {:?} has no value",
                field.name
            )));
        }
    }
    Ok(())
}

/// Check a replacement or revocation reason against the server limit.
///
/// Length is counted in characters. Replacement allows an empty reason,
/// revocation does not.
pub fn validate_reason(reason: &str, allow_empty: bool) -> Result<()> {
    if reason.is_empty() && !allow_empty {
        return Err(CertManagerError::InvalidReason(
            "reason must not be empty".into(),
        ));
    }

    let len = reason.chars().count();
    if len > MAX_REASON_LEN {
        return Err(CertManagerError::InvalidReason(format!(
            "reason is {len} characters, limit is {MAX_REASON_LEN}"
        )));
    }

    Ok(())
}

/// Client certificate enrollment
#[derive(Debug, Clone)]
pub struct EnrollRequest {
    /// Full certificate type name, as listed by the type catalog
    pub cert_type_name: String,
    /// PEM encoded CSR
    pub csr: String,
    /// Certificate term in days
    pub term: u32,
    /// Organization to enroll under
    pub org_id: u64,
    /// Person's e-mail
    pub email: String,
    /// Person's phone number
    pub phone: Option<String>,
    /// Additional e-mail addresses
    pub secondary_emails: Vec<String>,
    /// Person's first name
    pub first_name: Option<String>,
    /// Person's middle name
    pub middle_name: Option<String>,
    /// Person's last name
    pub last_name: Option<String>,
    /// Common name; the API builds one from the name parts when absent
    pub common_name: Option<String>,
    /// EduPerson principal name
    pub eppn: Option<String>,
    /// User principal name
    pub upn: Option<String>,
    /// Custom fields
    pub custom_fields: Vec<CustomField>,
}

impl EnrollRequest {
    /// Create an enrollment with the required fields
    #[must_use]
    pub fn new(
        cert_type_name: impl Into<String>,
        csr: impl Into<String>,
        email: impl Into<String>,
        term: u32,
        org_id: u64,
    ) -> Self {
        Self {
            cert_type_name: cert_type_name.into(),
            csr: csr.into(),
            term,
            org_id,
            email: email.into(),
            phone: None,
            secondary_emails: Vec::new(),
            first_name: None,
            middle_name: None,
            last_name: None,
            common_name: None,
            eppn: None,
            upn: None,
            custom_fields: Vec::new(),
        }
    }

    /// Set the phone number
    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Add a secondary e-mail
    #[must_use]
    pub fn secondary_email(mut self, email: impl Into<String>) -> Self {
        self.secondary_emails.push(email.into());
        self
    }

    /// Set first and last name
    #[must_use]
    pub fn name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    /// Set the middle name
    #[must_use]
    pub fn middle_name(mut self, middle: impl Into<String>) -> Self {
        self.middle_name = Some(middle.into());
        self
    }

    /// Set the common name
    #[must_use]
    pub fn common_name(mut self, cn: impl Into<String>) -> Self {
        self.common_name = Some(cn.into());
        self
    }

    /// Set the EPPN
    #[must_use]
    pub fn eppn(mut self, eppn: impl Into<String>) -> Self {
        self.eppn = Some(eppn.into());
        self
    }

    /// Set the UPN
    #[must_use]
    pub fn upn(mut self, upn: impl Into<String>) -> Self {
        self.upn = Some(upn.into());
        self
    }

    /// Add a custom field
    #[must_use]
    pub fn custom_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.push(CustomField::new(name, value));
        self
    }
}

/// Order identifiers returned by enroll and renew
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReference {
    /// Order number (obsolete, prefer `backend_cert_id`)
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub order_number: Option<String>,

    /// Certificate ID used by collect, replace and revoke
    #[serde(deserialize_with = "deserialize_id")]
    pub backend_cert_id: String,
}

/// Client certificate record from the list endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmimeCertificate {
    /// Certificate ID
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,

    /// Order number
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub order_number: Option<String>,

    /// Backend certificate ID
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub backend_cert_id: Option<String>,

    /// Certificate state (e.g. issued, revoked)
    #[serde(default)]
    pub state: Option<String>,

    /// Serial number
    #[serde(default)]
    pub serial_number: Option<String>,

    /// Expiry date
    #[serde(default)]
    pub expires: Option<String>,

    /// Fields this client does not model
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Filter for listing client certificates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmimeFilter {
    /// Person e-mail
    pub email: Option<String>,
    /// Common name
    pub common_name: Option<String>,
    /// Organization ID
    pub org_id: Option<u64>,
    /// Certificate type ID
    pub cert_type_id: Option<u64>,
    /// Serial number
    pub serial_number: Option<String>,
}

impl SmimeFilter {
    /// Translate into API query parameters
    #[must_use]
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ref email) = self.email {
            params.push(("email", email.clone()));
        }
        if let Some(ref cn) = self.common_name {
            params.push(("commonName", cn.clone()));
        }
        if let Some(org_id) = self.org_id {
            params.push(("orgId", org_id.to_string()));
        }
        if let Some(type_id) = self.cert_type_id {
            params.push(("typeId", type_id.to_string()));
        }
        if let Some(ref serial) = self.serial_number {
            params.push(("serialNumber", serial.clone()));
        }
        params
    }
}

/// Output format for certificate collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectFormat {
    /// PKCS#7 chain, base64
    #[serde(rename = "x509")]
    X509,
    /// Certificate only, base64
    #[serde(rename = "x509CO")]
    X509CertOnly,
    /// PKCS#7, base64
    #[serde(rename = "base64")]
    Base64,
    /// PKCS#7, binary
    #[serde(rename = "bin")]
    Binary,
    /// Intermediates and root, base64
    #[serde(rename = "x509IO")]
    X509IntermediatesOnly,
    /// Intermediates and root, reversed order, base64
    #[serde(rename = "x509IOR")]
    X509IntermediatesReversed,
}

impl CollectFormat {
    /// Query parameter value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X509 => "x509",
            Self::X509CertOnly => "x509CO",
            Self::Base64 => "base64",
            Self::Binary => "bin",
            Self::X509IntermediatesOnly => "x509IO",
            Self::X509IntermediatesReversed => "x509IOR",
        }
    }
}

impl fmt::Display for CollectFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revocation reason codes accepted by the API
///
/// The numbering follows RFC 5280; codes 2 and above 5 are not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RevocationReason {
    /// No specific reason
    Unspecified = 0,
    /// Private key was exposed
    KeyCompromise = 1,
    /// Subject's affiliation changed
    AffiliationChanged = 3,
    /// Certificate was replaced
    Superseded = 4,
    /// Certificate is no longer needed
    CessationOfOperation = 5,
}

impl RevocationReason {
    /// Numeric code sent to the API
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RevocationReason {
    type Error = CertManagerError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::KeyCompromise),
            3 => Ok(Self::AffiliationChanged),
            4 => Ok(Self::Superseded),
            5 => Ok(Self::CessationOfOperation),
            other => Err(CertManagerError::InvalidReasonCode(other)),
        }
    }
}

/// Certificate addressed by ID or by serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateRef {
    /// Backend certificate ID
    CertId(String),
    /// Certificate serial number
    Serial(String),
}

impl CertificateRef {
    /// Build from optional parts; exactly one must be given.
    pub fn from_parts(cert_id: Option<&str>, serial: Option<&str>) -> Result<Self> {
        match (non_empty(cert_id), non_empty(serial)) {
            (Some(id), None) => Ok(Self::CertId(id.to_string())),
            (None, Some(serial)) => Ok(Self::Serial(serial.to_string())),
            (Some(_), Some(_)) => Err(CertManagerError::ConflictingIdentifiers(
                "certificate ID and serial number",
            )),
            (None, None) => Err(CertManagerError::MissingIdentifier(
                "certificate ID or serial number",
            )),
        }
    }
}

/// Renewal addressed by order number or by serial number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewTarget {
    /// Order number
    OrderNumber(String),
    /// Certificate serial number
    Serial(String),
}

impl RenewTarget {
    /// Build from optional parts; exactly one must be given.
    pub fn from_parts(order_number: Option<&str>, serial: Option<&str>) -> Result<Self> {
        match (non_empty(order_number), non_empty(serial)) {
            (Some(order), None) => Ok(Self::OrderNumber(order.to_string())),
            (None, Some(serial)) => Ok(Self::Serial(serial.to_string())),
            (Some(_), Some(_)) => Err(CertManagerError::ConflictingIdentifiers(
                "order number and serial number",
            )),
            (None, None) => Err(CertManagerError::MissingIdentifier(
                "order number or serial number",
            )),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
