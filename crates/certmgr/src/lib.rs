//! Client for a certificate manager REST API with DNS-aware bulk domain validation.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use certmgr::{BulkOptions, BulkValidator, CertManagerClient, DnsVerifierConfig, ValidationRun};
//!
//! #[tokio::main]
//! async fn main() -> certmgr::Result<()> {
//!     let client = CertManagerClient::builder("customer", "login", "password").build()?;
//!     let validator = BulkValidator::with_system_dns(client, &DnsVerifierConfig::default())?;
//!
//!     // Start CNAME challenges for every domain awaiting validation
//!     let mut run = ValidationRun::new();
//!     validator.start_all(&mut run, &BulkOptions::default()).await?;
//!     print!("{run}");
//!
//!     // Later, once the records are published
//!     let submission = validator.submit_started(&mut run).await;
//!     println!("submitted: {:?}", submission.submitted());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `default` - rustls and `dcv`
//! - `rustls` - Use rustls for TLS (recommended)
//! - `native-tls` - Use system native TLS
//! - `dcv` - DNS challenge verification and the bulk validation workflow

#![doc(html_root_url = "https://docs.rs/certmgr/0.3.0")]

// Re-export core types
pub use certmgr_core::*;

// Re-export client
pub use certmgr_client::{
    api, CertManagerClient, CertManagerClientBuilder, ClientConfig, PollConfig,
};

// Re-export bulk validation if enabled
#[cfg(feature = "dcv")]
pub use certmgr_dcv::{
    bulk, dns, is_second_level, BulkOptions, BulkValidator, ChallengeOutcome, CnameLookup,
    DnsCheck, DnsError, DnsVerifier, DnsVerifierConfig, HickoryLookup, Submission,
    SubmissionReport, ValidationRun,
};

// Re-export runtime for convenience
pub use serde;
pub use serde_json;
pub use tokio;

#[cfg(all(test, feature = "dcv"))]
mod tests {
    use super::*;

    struct EmptyZone;

    #[async_trait::async_trait]
    impl CnameLookup for EmptyZone {
        async fn lookup_cname(&self, host: &str) -> std::result::Result<Vec<String>, DnsError> {
            Err(DnsError::NotFound(host.to_string()))
        }
    }

    #[test]
    fn facade_exposes_the_workflow() {
        let client = CertManagerClient::builder("acme", "operator", "secret")
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();
        let validator = BulkValidator::new(client, DnsVerifier::new(EmptyZone));

        let mut run = ValidationRun::new();
        let submission = tokio_test::block_on(validator.submit_started(&mut run));
        assert_eq!(submission, Submission::NothingToDo);
        assert_eq!(run.to_string(), "");
    }

    #[test]
    fn facade_exposes_core_rules() {
        assert!(is_second_level("example.com"));
        assert!(!is_second_level("example.co.uk"));
        assert_eq!(
            "cname".parse::<ValidationMethod>().unwrap(),
            ValidationMethod::Cname
        );
    }
}
