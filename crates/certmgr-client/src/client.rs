//! Main certificate manager API client implementation.

use crate::api::{DcvApi, SmimeApi};
use certmgr_core::{ApiErrorBody, CertManagerError, Result};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// The certificate manager API base URL
const DEFAULT_BASE_URL: &str = "https://cert-manager.com/api";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Main certificate manager API client
#[derive(Clone)]
pub struct CertManagerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: HttpClient,
    base_url: String,
    page_size: u32,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for CertManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManagerClient")
            .field("base_url", &self.inner.base_url)
            .field("page_size", &self.inner.page_size)
            .finish_non_exhaustive()
    }
}

impl CertManagerClient {
    /// Create a builder for the given account credentials
    #[must_use]
    pub fn builder(
        customer_uri: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> CertManagerClientBuilder {
        CertManagerClientBuilder::new(customer_uri, login, password)
    }

    /// Access domain control validation endpoints
    #[must_use]
    pub fn dcv(&self) -> DcvApi<'_> {
        DcvApi::new(self)
    }

    /// Access client certificate endpoints
    ///
    /// The returned value caches the certificate type catalog; keep it
    /// around for as long as that cache should live.
    #[must_use]
    pub fn smime(&self) -> SmimeApi {
        SmimeApi::new(self.clone())
    }

    /// Page size used by paginated searches
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.page_size
    }

    /// Perform a GET request returning JSON
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &[&str],
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.build_url(path, params)?;
        debug!(url = %url, "GET request");

        let response = self.execute(self.inner.http.get(url), None).await?;
        self.handle_response(response).await
    }

    /// Perform a GET request returning the raw body
    pub(crate) async fn get_bytes(
        &self,
        path: &[&str],
        params: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let url = self.build_url(path, params)?;
        debug!(url = %url, "GET bytes request");

        let response = self.execute(self.inner.http.get(url), timeout).await?;
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await.map_err(map_transport_error)?;
            Ok(body.to_vec())
        } else {
            Err(Self::error_from(status.as_u16(), response).await)
        }
    }

    /// Perform a POST request with JSON body
    pub(crate) async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &[&str],
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = self.build_url(path, &[])?;
        debug!(url = %url, "POST request");

        let response = self
            .execute(self.inner.http.post(url).json(body), timeout)
            .await?;
        self.handle_response(response).await
    }

    /// Perform a POST request without a body
    pub(crate) async fn post_bare<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
        let url = self.build_url(path, &[])?;
        debug!(url = %url, "POST request (no body)");

        let response = self.execute(self.inner.http.post(url), None).await?;
        self.handle_response(response).await
    }

    /// Perform a POST request whose response body is not needed
    pub(crate) async fn post_ack<B: Serialize + ?Sized>(
        &self,
        path: &[&str],
        body: &B,
    ) -> Result<()> {
        let url = self.build_url(path, &[])?;
        debug!(url = %url, "POST request (ack)");

        let response = self
            .execute(self.inner.http.post(url).json(body), None)
            .await?;
        self.handle_empty_response(response).await
    }

    /// Stream every record of a paginated collection
    ///
    /// One page is fetched per advance; the stream ends after the first
    /// page holding fewer records than the page size.
    pub(crate) fn paginate<T>(
        &self,
        path: &[&str],
        params: Vec<(&'static str, String)>,
    ) -> BoxStream<'_, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        let size = self.inner.page_size;

        stream::try_unfold(Some(0u32), move |position| {
            let path = path.clone();
            let mut query = params.clone();
            async move {
                let Some(position) = position else {
                    return Ok(None);
                };

                query.push(("position", position.to_string()));
                query.push(("size", size.to_string()));

                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                let page: Vec<T> = self.get(&segments, &query).await?;
                debug!(path = %path.join("/"), position, items = page.len(), "fetched page");

                let next = (page.len() >= size as usize).then(|| position.saturating_add(size));
                let items = stream::iter(page.into_iter().map(Ok::<T, CertManagerError>));
                Ok::<_, CertManagerError>(Some((items, next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    /// Build a URL from the base, path segments and query parameters
    ///
    /// Each segment is percent-encoded on its own, so `/`, `?` and `#`
    /// inside a caller value stay part of that segment.
    fn build_url(&self, path: &[&str], params: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&self.inner.base_url)
            .map_err(|e| CertManagerError::InvalidUrl(e.to_string()))?;

        url.path_segments_mut()
            .map_err(|()| {
                CertManagerError::InvalidUrl(format!(
                    "base URL '{}' can't carry a path",
                    self.inner.base_url
                ))
            })?
            .pop_if_empty()
            .extend(path);

        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Wait for the rate limiter, then send the request
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response> {
        if let Some(ref limiter) = self.inner.rate_limiter {
            limiter.until_ready().await;
        }

        let request = match timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        request.send().await.map_err(map_transport_error)
    }

    /// Handle an API response that returns JSON
    ///
    /// An empty body is read as JSON `null`.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(map_transport_error)?;
            let body = if body.trim().is_empty() { "null" } else { body.as_str() };
            serde_json::from_str(body).map_err(CertManagerError::Json)
        } else {
            Err(Self::error_from(status.as_u16(), response).await)
        }
    }

    /// Handle an API response whose body is ignored
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            Err(Self::error_from(status.as_u16(), response).await)
        }
    }

    /// Convert an error response to a `CertManagerError`
    async fn error_from(status: u16, response: reqwest::Response) -> CertManagerError {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();

        // Error bodies look like {"code": -183, "description": "..."}
        let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let description = parsed.description.unwrap_or(body);

        match (status, parsed.code) {
            (401, _) => CertManagerError::Unauthorized,
            (429, _) => {
                warn!("Rate limited by certificate manager API");
                CertManagerError::RateLimited { retry_after }
            }
            (404, None) => CertManagerError::NotFound {
                resource: description,
            },
            (_, code) => CertManagerError::Api {
                status,
                code,
                description,
            },
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> CertManagerError {
    if err.is_timeout() {
        CertManagerError::Timeout(err.to_string())
    } else {
        CertManagerError::Http(err.to_string())
    }
}

/// Builder for configuring a [`CertManagerClient`]
pub struct CertManagerClientBuilder {
    customer_uri: String,
    login: String,
    password: String,
    base_url: String,
    timeout: Duration,
    user_agent: String,
    page_size: u32,
    requests_per_second: Option<NonZeroU32>,
}

impl CertManagerClientBuilder {
    /// Create a new builder with the given account credentials
    #[must_use]
    pub fn new(
        customer_uri: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            customer_uri: customer_uri.into(),
            login: login.into(),
            password: password.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("certmgr-rust/{}", env!("CARGO_PKG_VERSION")),
            page_size: DEFAULT_PAGE_SIZE,
            requests_per_second: None,
        }
    }

    /// Set the base URL (useful for testing)
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Set the number of records requested per page
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Limit outgoing requests per second
    #[must_use]
    pub const fn rate_limit(mut self, requests_per_second: NonZeroU32) -> Self {
        self.requests_per_second = Some(requests_per_second);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<CertManagerClient> {
        if self.page_size == 0 {
            return Err(CertManagerError::Config("page size must be positive".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert("customeruri", header_value("customerUri", &self.customer_uri)?);
        headers.insert("login", header_value("login", &self.login)?);
        let mut password = header_value("password", &self.password)?;
        password.set_sensitive(true);
        headers.insert("password", password);

        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| CertManagerError::Config(format!("failed to build HTTP client: {e}")))?;

        let rate_limiter = self
            .requests_per_second
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(CertManagerClient {
            inner: Arc::new(ClientInner {
                http,
                base_url: self.base_url,
                page_size: self.page_size,
                rate_limiter,
            }),
        })
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| CertManagerError::Config(format!("{name} contains characters not allowed in a header")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn test_client(server: &MockServer) -> CertManagerClient {
        CertManagerClient::builder("acme", "operator", "secret")
            .base_url(server.uri())
            .page_size(2)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn sends_account_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("login", "operator"))
            .and(header("password", "secret"))
            .and(header("customeruri", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let value: serde_json::Value = client.get(&["ping"], &[]).await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(path("/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(path("/limit"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;
        Mock::given(path("/coded"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                serde_json::json!({"code": -104, "description": "Invalid domain"}),
            ))
            .mount(&server)
            .await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
            .mount(&server)
            .await;

        let client = test_client(&server);

        let err = client.get::<serde_json::Value>(&["auth"], &[]).await.unwrap_err();
        assert!(err.is_auth_error());

        let err = client.get::<serde_json::Value>(&["limit"], &[]).await.unwrap_err();
        assert!(matches!(err, CertManagerError::RateLimited { retry_after: Some(12) }));

        let err = client.get::<serde_json::Value>(&["coded"], &[]).await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.api_code(), Some(-104));
        assert!(err.to_string().contains("Invalid domain"));

        let err = client.get::<serde_json::Value>(&["missing"], &[]).await.unwrap_err();
        assert!(matches!(err, CertManagerError::NotFound { ref resource } if resource == "no such thing"));
    }

    #[tokio::test]
    async fn empty_success_body_reads_as_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clear"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let value: serde_json::Value = client
            .post(&["clear"], &serde_json::json!({"domain": "a.com"}), None)
            .await
            .unwrap();
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("position", "0"))
            .and(query_param("size", "2"))
            .and(query_param("kind", "x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("position", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([3])))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let items: Vec<u32> = client
            .paginate::<u32>(&["items"], vec![("kind", "x".to_string())])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![1, 2, 3]);

        // Each call starts again from the first page.
        let again: Vec<u32> = client
            .paginate::<u32>(&["items"], vec![("kind", "x".to_string())])
            .take(1)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(again, vec![1]);
    }

    #[test]
    fn path_segments_are_encoded_individually() {
        let client = CertManagerClient::builder("acme", "op", "pw")
            .base_url("https://cert-manager.com/api/")
            .build()
            .unwrap();

        let url = client
            .build_url(
                &["smime", "v1", "collect", "a/b?c#d"],
                &[("format", "bin".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://cert-manager.com/api/smime/v1/collect/a%2Fb%3Fc%23d?format=bin"
        );
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn rejects_bad_configuration() {
        let err = CertManagerClient::builder("acme", "op", "pw")
            .page_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, CertManagerError::Config(_)));

        let err = CertManagerClient::builder("acme", "op\n", "pw")
            .build()
            .unwrap_err();
        assert!(matches!(err, CertManagerError::Config(_)));
    }
}
