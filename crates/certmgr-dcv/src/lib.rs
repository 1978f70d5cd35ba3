//! DNS challenge verification and the bulk domain validation workflow.
//!
//! - [`dns`] checks that a CNAME challenge record is visible in DNS
//! - [`bulk`] starts challenges for every candidate domain and submits the
//!   ones whose proof is in place
//!
//! The state of a bulk run lives in a caller-owned [`ValidationRun`], so a
//! run can be inspected, persisted and resumed between calls.

#![doc(html_root_url = "https://docs.rs/certmgr-dcv/0.3.0")]

mod error;

pub mod bulk;
pub mod dns;

pub use bulk::{
    is_second_level, BulkOptions, BulkValidator, ChallengeOutcome, Submission, SubmissionReport,
    ValidationRun,
};
pub use dns::{CnameLookup, DnsCheck, DnsVerifier, DnsVerifierConfig, HickoryLookup};
pub use error::{DnsError, DnsResult};
