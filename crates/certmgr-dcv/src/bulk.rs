//! Bulk domain validation.
//!
//! A bulk run has two halves. [`BulkValidator::start_all`] starts a challenge
//! for every candidate domain and records it in a [`ValidationRun`]; once the
//! proof is published, [`BulkValidator::submit_started`] checks it and tells
//! the CA. The run is owned by the caller and can be kept across calls (it
//! also serializes), so submission can be retried as often as needed.

use crate::dns::{CnameLookup, DnsCheck, DnsVerifier, DnsVerifierConfig, HickoryLookup};
use certmgr_client::CertManagerClient;
use certmgr_core::{
    CertManagerError, ChallengeStatus, Result, ValidationChallenge, ValidationFilter,
    ValidationMethod,
};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Default number of domains handled at once
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Returns true if `domain` looks like a second-level domain.
///
/// This only counts dots: `example.com` passes, `example.co.uk`,
/// `www.example.com` and IPv4 literals do not.
#[must_use]
pub fn is_second_level(domain: &str) -> bool {
    domain.matches('.').count() == 1
}

/// Settings for starting a bulk run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOptions {
    /// Validation method used for every domain
    pub method: ValidationMethod,
    /// Skip domains that are not second-level
    pub only_second_level: bool,
    /// Candidate filter; `None` or an empty filter selects domains awaiting validation
    pub filter: Option<ValidationFilter>,
    /// Number of start requests in flight at once
    pub concurrency: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            method: ValidationMethod::Cname,
            only_second_level: true,
            filter: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl BulkOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validation method
    #[must_use]
    pub const fn method(mut self, method: ValidationMethod) -> Self {
        self.method = method;
        self
    }

    /// Include or skip domains below the second level
    #[must_use]
    pub const fn only_second_level(mut self, only: bool) -> Self {
        self.only_second_level = only;
        self
    }

    /// Set the candidate filter
    #[must_use]
    pub fn filter(mut self, filter: ValidationFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the number of concurrent start requests
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Challenges of one bulk run, in the order they were started
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRun {
    challenges: Vec<ValidationChallenge>,
}

impl ValidationRun {
    /// Create an empty run
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All challenges still held by the run
    #[must_use]
    pub fn challenges(&self) -> &[ValidationChallenge] {
        &self.challenges
    }

    /// Challenges that still need to be submitted
    pub fn outstanding(&self) -> impl Iterator<Item = &ValidationChallenge> {
        self.challenges.iter().filter(|c| c.status.is_outstanding())
    }

    /// Challenges whose start request failed
    pub fn failed(&self) -> impl Iterator<Item = &ValidationChallenge> {
        self.challenges
            .iter()
            .filter(|c| c.status == ChallengeStatus::Failed)
    }

    /// Number of challenges held
    #[must_use]
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    /// Returns true if the run holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    /// Zone file lines for the outstanding CNAME challenges
    #[must_use]
    pub fn zone_lines(&self) -> Vec<String> {
        self.outstanding()
            .filter(|c| c.method == ValidationMethod::Cname)
            .filter_map(|c| Some(format!("{} IN CNAME {}", c.host()?, c.point()?)))
            .collect()
    }

    fn outstanding_count(&self) -> usize {
        self.outstanding().count()
    }
}

impl fmt::Display for ValidationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.zone_lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// What happened to one challenge during submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The CA accepted the submission; the challenge left the run
    Submitted,
    /// The CNAME record is not visible yet
    NotPropagated,
    /// The CNAME record points at the wrong target
    Mismatch {
        /// Target that was published
        found: String,
    },
    /// DNS could not be queried
    ResolverFailure(String),
    /// The proof was verified but the submit request failed
    SubmitFailed(String),
    /// The method cannot be checked by the client; the proof has to be
    /// completed and submitted by hand
    AwaitingManualProof,
    /// The start response carried no CNAME host or target
    IncompleteChallenge,
}

/// Per-call result of [`BulkValidator::submit_started`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Domains submitted by this call, in run order
    pub submitted: Vec<String>,
    /// Every outstanding challenge looked at, in run order
    pub outcomes: Vec<(String, ChallengeOutcome)>,
}

/// Result of a submission pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The run had no outstanding challenges
    NothingToDo,
    /// At least one challenge was looked at
    Report(SubmissionReport),
}

impl Submission {
    /// Domains submitted by this call
    #[must_use]
    pub fn submitted(&self) -> &[String] {
        match self {
            Self::NothingToDo => &[],
            Self::Report(report) => &report.submitted,
        }
    }
}

/// Runs the bulk validation workflow against a client
pub struct BulkValidator<L = HickoryLookup> {
    client: CertManagerClient,
    verifier: DnsVerifier<L>,
    concurrency: usize,
}

impl BulkValidator<HickoryLookup> {
    /// Validator checking CNAME records through the system resolver
    pub fn with_system_dns(client: CertManagerClient, config: &DnsVerifierConfig) -> Result<Self> {
        Ok(Self::new(client, DnsVerifier::system(config)?))
    }
}

impl<L: CnameLookup> BulkValidator<L> {
    /// Create a validator
    pub fn new(client: CertManagerClient, verifier: DnsVerifier<L>) -> Self {
        Self {
            client,
            verifier,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Number of verify/submit and clear operations in flight at once
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Domains a bulk run would start, in search order
    ///
    /// Repeated domains are returned once.
    pub async fn select_candidates(
        &self,
        filter: Option<&ValidationFilter>,
        only_second_level: bool,
    ) -> Result<Vec<String>> {
        let filter = filter
            .filter(|f| !f.is_empty())
            .cloned()
            .unwrap_or_else(ValidationFilter::awaiting_validation);

        let mut seen = HashSet::new();
        let candidates: Vec<String> = self
            .client
            .dcv()
            .find(&filter)
            .map_ok(|record| record.domain)
            .try_filter(|domain| {
                let keep = !only_second_level || is_second_level(domain);
                async move { keep }
            })
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .filter(|domain| seen.insert(domain.clone()))
            .collect();

        debug!(count = candidates.len(), "selected candidates");
        Ok(candidates)
    }

    /// Start a challenge for every candidate domain
    ///
    /// Fails with [`CertManagerError::RunInProgress`] while `run` still has
    /// outstanding challenges. A failed start is recorded as
    /// [`ChallengeStatus::Failed`] and the other domains carry on. An
    /// authentication error is returned once every start has finished;
    /// challenges the CA did start are still recorded in `run`.
    #[instrument(skip(self, run, options), fields(method = %options.method))]
    pub async fn start_all<'r>(
        &self,
        run: &'r mut ValidationRun,
        options: &BulkOptions,
    ) -> Result<&'r [ValidationChallenge]> {
        let outstanding = run.outstanding_count();
        if outstanding > 0 {
            return Err(CertManagerError::RunInProgress { outstanding });
        }

        let candidates = self
            .select_candidates(options.filter.as_ref(), options.only_second_level)
            .await?;

        let client = &self.client;
        let method = options.method;
        let responses: Vec<Result<ValidationChallenge>> = stream::iter(candidates)
            .map(|domain| async move {
                let response = client.dcv().start(&domain, method).await;
                match response {
                    Ok(details) => Ok(ValidationChallenge::started(domain, method, details)),
                    Err(err) if err.is_auth_error() => Err(err),
                    Err(err) => {
                        warn!(domain = %domain, error = %err, "failed to start DCV");
                        Ok(ValidationChallenge::failed(domain, method))
                    }
                }
            })
            .buffered(options.concurrency.max(1))
            .collect()
            .await;

        let mut auth_error = None;
        run.challenges = Vec::with_capacity(responses.len());
        for response in responses {
            match response {
                Ok(challenge) => run.challenges.push(challenge),
                Err(err) => {
                    auth_error.get_or_insert(err);
                }
            }
        }

        info!(
            started = run.outstanding_count(),
            failed = run.failed().count(),
            "started DCV challenges"
        );
        if let Some(err) = auth_error {
            warn!(error = %err, "credentials rejected while starting DCV");
            return Err(err);
        }
        Ok(&run.challenges)
    }

    /// Verify and submit the outstanding challenges of `run`
    ///
    /// Methods are handled in the order cname, email, http, https. CNAME
    /// challenges are checked in DNS and submitted once the record is in
    /// place; submitted challenges leave the run, everything else stays for
    /// the next call. Other methods are reported as awaiting manual proof.
    #[instrument(skip(self, run), fields(outstanding = run.outstanding_count()))]
    pub async fn submit_started(&self, run: &mut ValidationRun) -> Submission {
        if run.outstanding_count() == 0 {
            debug!("no outstanding challenges");
            return Submission::NothingToDo;
        }

        let mut results = Vec::new();
        for method in ValidationMethod::ALL {
            let pending: Vec<usize> = run
                .challenges
                .iter()
                .enumerate()
                .filter(|(_, c)| c.method == method && c.status.is_outstanding())
                .map(|(idx, _)| idx)
                .collect();

            if pending.is_empty() {
                continue;
            }

            if method.is_self_verifiable() {
                let challenges = &run.challenges;
                let pass: Vec<_> = stream::iter(pending)
                    .map(|idx| async move {
                        let (status, outcome) = self.verify_and_submit(&challenges[idx]).await;
                        (idx, status, outcome)
                    })
                    .buffered(self.concurrency)
                    .collect()
                    .await;
                results.extend(pass);
            } else {
                info!(%method, count = pending.len(), "challenges await manual proof");
                results.extend(pending.into_iter().map(|idx| {
                    (
                        idx,
                        run.challenges[idx].status,
                        ChallengeOutcome::AwaitingManualProof,
                    )
                }));
            }
        }

        results.sort_by_key(|(idx, ..)| *idx);

        let mut report = SubmissionReport::default();
        for (idx, status, outcome) in results {
            let challenge = &mut run.challenges[idx];
            challenge.status = status;
            if status == ChallengeStatus::Submitted {
                report.submitted.push(challenge.domain.clone());
            }
            report.outcomes.push((challenge.domain.clone(), outcome));
        }
        run.challenges
            .retain(|c| c.status != ChallengeStatus::Submitted);

        info!(
            submitted = report.submitted.len(),
            remaining = run.outstanding_count(),
            "submission pass finished"
        );
        Submission::Report(report)
    }

    /// Clear every outstanding challenge at the CA and empty the run
    ///
    /// Returns the domains whose clear request succeeded. Domains whose
    /// clear failed are dropped from the run all the same.
    #[instrument(skip(self, run), fields(outstanding = run.outstanding_count()))]
    pub async fn clear_run(&self, run: &mut ValidationRun) -> Vec<String> {
        let client = &self.client;
        let cleared: Vec<String> = stream::iter(run.outstanding())
            .map(|challenge| async move {
                match client.dcv().clear(&challenge.domain).await {
                    Ok(_) => Some(challenge.domain.clone()),
                    Err(err) => {
                        warn!(domain = %challenge.domain, error = %err, "failed to clear DCV");
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .filter_map(|domain| async move { domain })
            .collect()
            .await;

        run.challenges.clear();
        info!(cleared = cleared.len(), "cleared validation run");
        cleared
    }

    async fn verify_and_submit(
        &self,
        challenge: &ValidationChallenge,
    ) -> (ChallengeStatus, ChallengeOutcome) {
        let domain = challenge.domain.as_str();

        // Verified challenges already passed DNS; only the submit is retried.
        if challenge.status == ChallengeStatus::Started {
            let (Some(host), Some(point)) = (challenge.host(), challenge.point()) else {
                warn!(domain, "start response carried no CNAME record");
                return (ChallengeStatus::Started, ChallengeOutcome::IncompleteChallenge);
            };

            let outcome = match self.verifier.verify_cname(host, point).await {
                DnsCheck::Match => None,
                DnsCheck::Mismatch { found } => Some(ChallengeOutcome::Mismatch { found }),
                DnsCheck::NotPropagated => Some(ChallengeOutcome::NotPropagated),
                DnsCheck::ResolverFailure(reason) => {
                    Some(ChallengeOutcome::ResolverFailure(reason))
                }
            };
            if let Some(outcome) = outcome {
                debug!(domain, ?outcome, "CNAME not in place");
                return (ChallengeStatus::Started, outcome);
            }
        }

        match self.client.dcv().submit(domain, challenge.method).await {
            Ok(result) => {
                debug!(domain, status = ?result.status, "submitted DCV");
                (ChallengeStatus::Submitted, ChallengeOutcome::Submitted)
            }
            Err(err) => {
                warn!(domain, error = %err, "failed to submit DCV, will retry");
                (
                    ChallengeStatus::Verified,
                    ChallengeOutcome::SubmitFailed(err.to_string()),
                )
            }
        }
    }
}
