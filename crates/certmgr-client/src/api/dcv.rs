//! Domain control validation endpoints.

use crate::CertManagerClient;
use certmgr_core::{
    CertManagerError, DcvState, DomainValidation, Result, StartedChallenge, SubmitResult,
    ValidationFilter, ValidationMethod,
};
use futures_util::stream::BoxStream;
use serde::Serialize;
use tracing::debug;

const VALIDATION_PATH: [&str; 3] = ["dcv", "v2", "validation"];

#[derive(Serialize)]
struct DomainBody<'a> {
    domain: &'a str,
}

/// Domain control validation endpoints
pub struct DcvApi<'a> {
    client: &'a CertManagerClient,
}

impl<'a> DcvApi<'a> {
    pub(crate) fn new(client: &'a CertManagerClient) -> Self {
        Self { client }
    }

    /// Get the current validation state of a domain
    pub async fn status(&self, domain: &str) -> Result<DcvState> {
        self.client
            .post(&validation_path(&["status"]), &DomainBody { domain }, None)
            .await
    }

    /// Search domains by validation state
    ///
    /// The returned stream fetches one page per advance and ends after the
    /// last page. Calling `find` again restarts from the first page.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use futures_util::TryStreamExt;
    ///
    /// let domains: Vec<_> = client
    ///     .dcv()
    ///     .find(&ValidationFilter::awaiting_validation())
    ///     .try_collect()
    ///     .await?;
    /// ```
    pub fn find(&self, filter: &ValidationFilter) -> BoxStream<'a, Result<DomainValidation>> {
        self.client.paginate(&VALIDATION_PATH, filter.to_query())
    }

    /// Start a challenge for one domain
    ///
    /// `method` may be a [`ValidationMethod`] or a method name; names are
    /// checked before any request is sent.
    pub async fn start<M>(&self, domain: &str, method: M) -> Result<StartedChallenge>
    where
        M: TryInto<ValidationMethod>,
        CertManagerError: From<M::Error>,
    {
        let method = method.try_into()?;
        debug!(domain, %method, "starting DCV");

        self.client
            .post(
                &validation_path(&["start", "domain", method.as_str()]),
                &DomainBody { domain },
                None,
            )
            .await
    }

    /// Tell the CA that the proof for a started challenge is in place
    pub async fn submit<M>(&self, domain: &str, method: M) -> Result<SubmitResult>
    where
        M: TryInto<ValidationMethod>,
        CertManagerError: From<M::Error>,
    {
        let method = method.try_into()?;
        debug!(domain, %method, "submitting DCV");

        self.client
            .post(
                &validation_path(&["submit", "domain", method.as_str()]),
                &DomainBody { domain },
                None,
            )
            .await
    }

    /// Clear a started challenge
    pub async fn clear(&self, domain: &str) -> Result<serde_json::Value> {
        self.client
            .post(&validation_path(&["clear"]), &DomainBody { domain }, None)
            .await
    }
}

fn validation_path<'s>(rest: &[&'s str]) -> Vec<&'s str> {
    let mut path: Vec<&'s str> = VALIDATION_PATH.to_vec();
    path.extend_from_slice(rest);
    path
}

#[cfg(test)]
mod tests {
    use crate::client::tests::test_client;
    use certmgr_core::{CertManagerError, DcvStatus, ValidationFilter, ValidationMethod};
    use futures_util::TryStreamExt;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn start_posts_domain_to_method_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dcv/v2/validation/start/domain/cname"))
            .and(body_json(serde_json::json!({"domain": "example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "host": "_0a1b.example.com.",
                "point": "c3d4.dcv.sectigo.com."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let started = client
            .dcv()
            .start("example.com", ValidationMethod::Cname)
            .await
            .unwrap();
        assert_eq!(started.host.as_deref(), Some("_0a1b.example.com."));
        assert_eq!(started.point.as_deref(), Some("c3d4.dcv.sectigo.com."));
    }

    #[tokio::test]
    async fn invalid_method_never_reaches_the_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server);
        for domain in ["example.com", "", "x.y.z", "192.0.2.1"] {
            let err = client.dcv().start(domain, "txt").await.unwrap_err();
            assert!(matches!(err, CertManagerError::InvalidValidationMethod(ref m) if m == "txt"));

            let err = client.dcv().submit(domain, "CNAME").await.unwrap_err();
            assert!(matches!(err, CertManagerError::InvalidValidationMethod(_)));
        }
    }

    #[tokio::test]
    async fn submit_and_status_parse_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dcv/v2/validation/submit/domain/http"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "NOT_VALIDATED",
                "orderStatus": "SUBMITTED",
                "message": "queued"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dcv/v2/validation/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "VALIDATED",
                "expirationDate": "2027-01-31"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let submitted = client.dcv().submit("example.com", "http").await.unwrap();
        assert_eq!(submitted.message.as_deref(), Some("queued"));

        let state = client.dcv().status("example.com").await.unwrap();
        assert!(state.is_validated());
        assert_eq!(state.status, Some(DcvStatus::Validated));
    }

    #[tokio::test]
    async fn find_sends_translated_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dcv/v2/validation"))
            .and(query_param("dcvStatus", "NOT_VALIDATED"))
            .and(query_param("orderStatus", "NOT_INITIATED"))
            .and(query_param("position", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"domain": "a.com"},
                {"domain": "b.com"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dcv/v2/validation"))
            .and(query_param("position", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let found: Vec<_> = client
            .dcv()
            .find(&ValidationFilter::awaiting_validation())
            .try_collect()
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(names, vec!["a.com", "b.com"]);
    }

    #[tokio::test]
    async fn clear_tolerates_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dcv/v2/validation/clear"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        assert!(client.dcv().clear("a.com").await.unwrap().is_null());
    }
}
