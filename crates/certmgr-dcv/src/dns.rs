//! CNAME challenge verification.

use crate::error::{DnsError, DnsResult};
use async_trait::async_trait;
use certmgr_core::normalize_name;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default time allowed for one CNAME lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of CNAME answers
#[async_trait]
pub trait CnameLookup: Send + Sync {
    /// Return the CNAME targets published for `host`, in answer order.
    ///
    /// A name without a CNAME record is reported as [`DnsError::NotFound`].
    async fn lookup_cname(&self, host: &str) -> DnsResult<Vec<String>>;
}

#[async_trait]
impl<L: CnameLookup + ?Sized> CnameLookup for Arc<L> {
    async fn lookup_cname(&self, host: &str) -> DnsResult<Vec<String>> {
        (**self).lookup_cname(host).await
    }
}

/// DNS verifier settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsVerifierConfig {
    /// Time allowed for one lookup
    pub timeout: Duration,
}

impl Default for DnsVerifierConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl DnsVerifierConfig {
    /// Set the lookup timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// CNAME lookups through the system resolver
pub struct HickoryLookup {
    resolver: TokioResolver,
    timeout: Duration,
}

impl HickoryLookup {
    /// Create a lookup using the system resolver configuration
    pub fn new(config: &DnsVerifierConfig) -> DnsResult<Self> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| DnsError::Init(e.to_string()))?
            .build();
        Ok(Self::from_resolver(resolver, config))
    }

    /// Wrap an already configured resolver
    #[must_use]
    pub fn from_resolver(resolver: TokioResolver, config: &DnsVerifierConfig) -> Self {
        Self {
            resolver,
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl CnameLookup for HickoryLookup {
    async fn lookup_cname(&self, host: &str) -> DnsResult<Vec<String>> {
        let query = self.resolver.lookup(host, RecordType::CNAME);
        let answer = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| DnsError::Timeout {
                host: host.to_string(),
                after: self.timeout,
            })?;

        match answer {
            Ok(lookup) => Ok(lookup
                .iter()
                .filter_map(|rdata| match rdata {
                    RData::CNAME(target) => Some(target.0.to_string()),
                    _ => None,
                })
                .collect()),
            Err(e) if e.is_nx_domain() || e.is_no_records_found() => {
                Err(DnsError::NotFound(host.to_string()))
            }
            Err(e) => Err(DnsError::Resolver(e.to_string())),
        }
    }
}

/// Outcome of checking one challenge record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCheck {
    /// The record points at the expected target
    Match,
    /// The record exists but points elsewhere
    Mismatch {
        /// Target that was published, normalized
        found: String,
    },
    /// No record is visible yet
    NotPropagated,
    /// The resolver could not answer
    ResolverFailure(String),
}

impl DnsCheck {
    /// Returns true if the expected record was found
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Checks CNAME challenge records
///
/// Verification only reads DNS; running it again against an unchanged
/// zone gives the same answer.
pub struct DnsVerifier<L = HickoryLookup> {
    lookup: L,
}

impl DnsVerifier<HickoryLookup> {
    /// Verifier backed by the system resolver
    pub fn system(config: &DnsVerifierConfig) -> DnsResult<Self> {
        Ok(Self::new(HickoryLookup::new(config)?))
    }
}

impl<L: CnameLookup> DnsVerifier<L> {
    /// Create a verifier over a lookup implementation
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Check that `host` has a CNAME pointing at `expected`
    ///
    /// Only the first answer is considered. Names are compared without a
    /// trailing root dot and ignoring ASCII case.
    pub async fn verify_cname(&self, host: &str, expected: &str) -> DnsCheck {
        let answers = match self.lookup.lookup_cname(host).await {
            Ok(answers) => answers,
            Err(e) if e.is_not_found() => {
                debug!(host, "CNAME not found");
                return DnsCheck::NotPropagated;
            }
            Err(e) => {
                warn!(host, error = %e, "CNAME lookup failed");
                return DnsCheck::ResolverFailure(e.to_string());
            }
        };

        let Some(first) = answers.first() else {
            debug!(host, "empty CNAME answer");
            return DnsCheck::NotPropagated;
        };

        let found = normalize_name(first);
        if found.eq_ignore_ascii_case(normalize_name(expected)) {
            debug!(host, target = found, "CNAME matches");
            DnsCheck::Match
        } else {
            debug!(host, found, expected, "CNAME points elsewhere");
            DnsCheck::Mismatch {
                found: found.to_string(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory zone for tests
    #[derive(Default)]
    pub(crate) struct FakeLookup {
        answers: Mutex<HashMap<String, DnsResult<Vec<String>>>>,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        pub(crate) fn set(&self, host: &str, targets: &[&str]) {
            self.answers.lock().unwrap().insert(
                host.to_string(),
                Ok(targets.iter().map(ToString::to_string).collect()),
            );
        }

        pub(crate) fn fail(&self, host: &str, error: DnsError) {
            self.answers
                .lock()
                .unwrap()
                .insert(host.to_string(), Err(error));
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CnameLookup for FakeLookup {
        async fn lookup_cname(&self, host: &str) -> DnsResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .get(host)
                .cloned()
                .unwrap_or_else(|| Err(DnsError::NotFound(host.to_string())))
        }
    }

    fn verifier() -> (Arc<FakeLookup>, DnsVerifier<Arc<FakeLookup>>) {
        let zone = Arc::new(FakeLookup::default());
        (Arc::clone(&zone), DnsVerifier::new(zone))
    }

    #[tokio::test]
    async fn trailing_dot_and_case_are_ignored() {
        let (zone, verifier) = verifier();
        zone.set("_a1.example.com", &["Abc.DCV.sectigo.com."]);

        assert_eq!(
            verifier
                .verify_cname("_a1.example.com", "abc.dcv.sectigo.com")
                .await,
            DnsCheck::Match
        );
        assert!(verifier
            .verify_cname("_a1.example.com", "abc.dcv.sectigo.com.")
            .await
            .is_match());
    }

    #[tokio::test]
    async fn only_first_answer_counts() {
        let (zone, verifier) = verifier();
        zone.set("_a1.example.com", &["other.example.net.", "abc.dcv.sectigo.com."]);

        assert_eq!(
            verifier
                .verify_cname("_a1.example.com", "abc.dcv.sectigo.com")
                .await,
            DnsCheck::Mismatch {
                found: "other.example.net".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_record_is_not_propagated() {
        let (zone, verifier) = verifier();
        zone.set("_empty.example.com", &[]);

        assert_eq!(
            verifier.verify_cname("_none.example.com", "x.example").await,
            DnsCheck::NotPropagated
        );
        assert_eq!(
            verifier.verify_cname("_empty.example.com", "x.example").await,
            DnsCheck::NotPropagated
        );
    }

    #[tokio::test]
    async fn resolver_errors_are_reported_not_raised() {
        let (zone, verifier) = verifier();
        zone.fail("_a1.example.com", DnsError::Resolver("SERVFAIL".into()));
        zone.fail(
            "_a2.example.com",
            DnsError::Timeout {
                host: "_a2.example.com".into(),
                after: DEFAULT_LOOKUP_TIMEOUT,
            },
        );

        assert!(matches!(
            verifier.verify_cname("_a1.example.com", "x.example").await,
            DnsCheck::ResolverFailure(ref reason) if reason.contains("SERVFAIL")
        ));
        assert!(matches!(
            verifier.verify_cname("_a2.example.com", "x.example").await,
            DnsCheck::ResolverFailure(_)
        ));
    }

    #[tokio::test]
    async fn verification_is_repeatable() {
        let (zone, verifier) = verifier();
        zone.set("_a1.example.com", &["wrong.example."]);

        let first = verifier.verify_cname("_a1.example.com", "right.example").await;
        let second = verifier.verify_cname("_a1.example.com", "right.example").await;
        assert_eq!(first, second);
        assert_eq!(zone.calls(), 2);
    }

    #[test]
    fn default_config() {
        assert_eq!(DnsVerifierConfig::default().timeout, Duration::from_secs(5));
        let config = DnsVerifierConfig::default().timeout(Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_millis(250));
    }
}
