//! Client (S/MIME) certificate lifecycle endpoints.

use crate::{CertManagerClient, PollConfig};
use certmgr_core::{
    validate_custom_fields, validate_reason, CertManagerError, CertType, CertTypeCatalog,
    CertificateRef, CollectFormat, CustomField, EnrollRequest, OrderReference, RenewTarget,
    Result, RevocationReason, SmimeCertificate, SmimeFilter, PENDING_CODES, REVOKED_CODES,
};
use futures_util::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrollPayload<'a> {
    org_id: u64,
    csr: &'a str,
    cert_type: u64,
    term: u32,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    secondary_emails: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    middle_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    common_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eppn: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upn: Option<&'a str>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    custom_fields: &'a [CustomField],
}

#[derive(Serialize)]
struct ReplacePayload<'a> {
    csr: &'a str,
    reason: &'a str,
    revoke: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RevokePayload<'a> {
    reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_code: Option<u8>,
}

#[derive(Serialize)]
struct RevokeByEmailPayload<'a> {
    email: &'a str,
    reason: &'a str,
}

/// Client certificate endpoints
///
/// Holds the certificate type catalog once it has been fetched; the
/// catalog is never refreshed for the lifetime of this value.
pub struct SmimeApi {
    client: CertManagerClient,
    types: OnceCell<Arc<CertTypeCatalog>>,
}

impl SmimeApi {
    pub(crate) fn new(client: CertManagerClient) -> Self {
        Self {
            client,
            types: OnceCell::new(),
        }
    }

    /// Certificate types available to the account, fetched on first use
    pub async fn types(&self) -> Result<Arc<CertTypeCatalog>> {
        self.types
            .get_or_try_init(|| async {
                let types: Vec<CertType> = self.client.get(&["smime", "v1", "types"], &[]).await?;
                debug!(count = types.len(), "fetched certificate types");
                Ok::<_, CertManagerError>(Arc::new(types.into_iter().collect()))
            })
            .await
            .map(Arc::clone)
    }

    /// List client certificates matching a filter
    pub fn list(&self, filter: &SmimeFilter) -> BoxStream<'_, Result<SmimeCertificate>> {
        self.client.paginate(&["smime", "v2"], filter.to_query())
    }

    /// List client certificates of the person with the given e-mail
    pub async fn list_by_email(&self, email: &str) -> Result<Vec<SmimeCertificate>> {
        require_non_empty("email", email)?;
        self.client
            .get(&["smime", "v2", "byPersonEmail", email], &[])
            .await
    }

    /// Enroll a client certificate
    ///
    /// The type name and term are checked against the catalog and the
    /// custom fields are checked locally before the request is sent.
    pub async fn enroll(&self, request: &EnrollRequest) -> Result<OrderReference> {
        self.enroll_inner(request, None).await
    }

    /// Enroll a client certificate with a timeout for the enroll request
    pub async fn enroll_with_timeout(
        &self,
        request: &EnrollRequest,
        timeout: Duration,
    ) -> Result<OrderReference> {
        self.enroll_inner(request, Some(timeout)).await
    }

    #[instrument(skip(self, request), fields(cert_type = %request.cert_type_name, term = request.term))]
    async fn enroll_inner(
        &self,
        request: &EnrollRequest,
        timeout: Option<Duration>,
    ) -> Result<OrderReference> {
        validate_custom_fields(&request.custom_fields)?;
        let catalog = self.types().await?;
        let cert_type = catalog.resolve(&request.cert_type_name, request.term)?;

        let payload = EnrollPayload {
            org_id: request.org_id,
            csr: request.csr.trim_end(),
            cert_type: cert_type.id,
            term: request.term,
            email: &request.email,
            phone: request.phone.as_deref(),
            secondary_emails: &request.secondary_emails,
            first_name: request.first_name.as_deref(),
            middle_name: request.middle_name.as_deref(),
            last_name: request.last_name.as_deref(),
            common_name: request.common_name.as_deref(),
            eppn: request.eppn.as_deref(),
            upn: request.upn.as_deref(),
            custom_fields: &request.custom_fields,
        };

        let order: OrderReference = self
            .client
            .post(&["smime", "v1", "enroll"], &payload, timeout)
            .await?;
        info!(cert_id = %order.backend_cert_id, "enrolled certificate");
        Ok(order)
    }

    /// Collect an issued certificate
    ///
    /// Fails with [`CertManagerError::Pending`] while issuance is running
    /// and with [`CertManagerError::Revoked`] if the certificate was
    /// revoked first.
    #[must_use]
    pub fn collect(&self, cert_id: impl Into<String>) -> CollectRequestBuilder<'_> {
        CollectRequestBuilder::new(self, cert_id.into())
    }

    /// Collect a certificate, polling while it is pending
    ///
    /// Returns the certificate body, the first error that is not
    /// `Pending`, or the last `Pending` once `poll.max_attempts` calls
    /// have been made.
    pub async fn collect_when_ready(
        &self,
        cert_id: &str,
        format: Option<CollectFormat>,
        poll: &PollConfig,
    ) -> Result<Vec<u8>> {
        let max_attempts = poll.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let mut request = self.collect(cert_id);
            if let Some(format) = format {
                request = request.format(format);
            }

            match request.send().await {
                Err(err) if err.is_pending() => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    let delay = poll.backoff_for(attempt - 1);
                    debug!(cert_id, attempt, ?delay, "certificate pending, waiting");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Replace the key material of an existing certificate
    ///
    /// `reason` may be empty but is limited to 511 characters.
    pub async fn replace(&self, cert_id: &str, csr: &str, reason: &str, revoke: bool) -> Result<()> {
        require_non_empty("cert_id", cert_id)?;
        require_non_empty("csr", csr)?;
        validate_reason(reason, true)?;

        self.client
            .post_ack(
                &["smime", "v2", "replace", "order", cert_id],
                &ReplacePayload { csr, reason, revoke },
            )
            .await
    }

    /// Renew a certificate by order or serial number
    pub async fn renew(&self, target: &RenewTarget) -> Result<OrderReference> {
        let (kind, value) = match target {
            RenewTarget::OrderNumber(order) => ("order", order.as_str()),
            RenewTarget::Serial(serial) => ("serial", serial.as_str()),
        };
        self.client
            .post_bare(&["smime", "v2", "renew", kind, value])
            .await
    }

    /// Revoke a certificate by ID or serial number
    ///
    /// `reason` must be 1 to 511 characters.
    pub async fn revoke(
        &self,
        certificate: &CertificateRef,
        reason_code: Option<RevocationReason>,
        reason: &str,
    ) -> Result<()> {
        validate_reason(reason, false)?;

        let (kind, value) = match certificate {
            CertificateRef::CertId(id) => ("order", id.as_str()),
            CertificateRef::Serial(serial) => ("serial", serial.as_str()),
        };
        let payload = RevokePayload {
            reason,
            reason_code: reason_code.map(RevocationReason::code),
        };

        self.client
            .post_ack(&["smime", "v1", "revoke", kind, value], &payload)
            .await?;
        info!(?certificate, "revoked certificate");
        Ok(())
    }

    /// Revoke every certificate issued to the given e-mail
    pub async fn revoke_by_email(&self, email: &str, reason: &str) -> Result<()> {
        require_non_empty("email", email)?;
        validate_reason(reason, false)?;

        self.client
            .post_ack(
                &["smime", "v1", "revoke"],
                &RevokeByEmailPayload { email, reason },
            )
            .await?;
        info!(email, "revoked certificates by e-mail");
        Ok(())
    }
}

/// Builder for collection requests
pub struct CollectRequestBuilder<'a> {
    api: &'a SmimeApi,
    cert_id: String,
    format: Option<CollectFormat>,
    timeout: Option<Duration>,
}

impl<'a> CollectRequestBuilder<'a> {
    fn new(api: &'a SmimeApi, cert_id: String) -> Self {
        Self {
            api,
            cert_id,
            format: None,
            timeout: None,
        }
    }

    /// Request a specific output format
    #[must_use]
    pub const fn format(mut self, format: CollectFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Override the request timeout for this call
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Execute the request
    ///
    /// The body is returned as sent by the server: PEM or base64 text for
    /// the textual formats, DER for [`CollectFormat::Binary`].
    pub async fn send(self) -> Result<Vec<u8>> {
        require_non_empty("cert_id", &self.cert_id)?;

        let mut params = Vec::new();
        if let Some(format) = self.format {
            params.push(("format", format.as_str().to_string()));
        }

        self.api
            .client
            .get_bytes(
                &["smime", "v1", "collect", self.cert_id.as_str()],
                &params,
                self.timeout,
            )
            .await
            .map_err(|err| classify_collect_error(&self.cert_id, err))
    }
}

/// Map API error codes on a failed collection to the expected states.
fn classify_collect_error(cert_id: &str, err: CertManagerError) -> CertManagerError {
    match err.api_code() {
        Some(code) if REVOKED_CODES.contains(&code) => CertManagerError::Revoked {
            cert_id: cert_id.to_string(),
        },
        Some(code) if PENDING_CODES.contains(&code) => CertManagerError::Pending {
            cert_id: cert_id.to_string(),
        },
        _ => err,
    }
}

fn is_empty_slice<T>(items: &&[T]) -> bool {
    items.is_empty()
}

fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CertManagerError::InvalidArgument(format!(
            "argument '{name}' can't be empty"
        )));
    }
    Ok(())
}
