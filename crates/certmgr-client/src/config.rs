//! Client configuration types.

use crate::client::CertManagerClientBuilder;
use certmgr_core::{CertManagerError, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

/// Polling schedule for certificate collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Maximum number of collection attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff", with = "secs")]
    pub initial_backoff: Duration,

    /// Upper bound for a single delay
    #[serde(default = "default_max_backoff", with = "secs")]
    pub max_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    /// Create a new polling configuration
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }

    /// Set maximum attempts
    #[must_use]
    pub const fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set initial backoff duration
    #[must_use]
    pub const fn initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Set maximum backoff duration
    #[must_use]
    pub const fn max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Calculate backoff after a given failed attempt (0-based)
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let initial = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        let backoff = initial.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(backoff.min(max))
    }
}

const fn default_max_attempts() -> u32 {
    20
}

const fn default_initial_backoff() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_backoff() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Connection settings, loadable from a TOML file
///
/// The password is deliberately not part of the file; it is passed to
/// [`ClientConfig::builder`] by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Customer URI identifying the account
    #[serde(default)]
    pub customer_uri: String,

    /// API login
    #[serde(default)]
    pub login: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Records per page for paginated searches
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Optional client-side request rate limit
    #[serde(default)]
    pub requests_per_second: Option<NonZeroU32>,

    /// Optional User-Agent override
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Collection polling schedule
    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            customer_uri: String::new(),
            login: String::new(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            requests_per_second: None,
            user_agent: None,
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CertManagerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CertManagerError::Config(e.to_string()))
    }

    /// Create a client builder from this configuration
    pub fn builder(&self, password: impl Into<String>) -> Result<CertManagerClientBuilder> {
        if self.customer_uri.is_empty() || self.login.is_empty() {
            return Err(CertManagerError::Config(
                "customer_uri and login must be set".into(),
            ));
        }

        let mut builder = CertManagerClientBuilder::new(&self.customer_uri, &self.login, password)
            .base_url(&self.base_url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .page_size(self.page_size);

        if let Some(rps) = self.requests_per_second {
            builder = builder.rate_limit(rps);
        }
        if let Some(ref agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        Ok(builder)
    }
}

// Default value functions for serde.
fn default_base_url() -> String {
    String::from("https://cert-manager.com/api")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_page_size() -> u32 {
    crate::client::DEFAULT_PAGE_SIZE
}

/// Durations as (fractional) seconds in config files.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn backoff_doubles_and_caps() {
        let poll = PollConfig::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(500));
        assert_eq!(poll.backoff_for(0), Duration::from_millis(100));
        assert_eq!(poll.backoff_for(1), Duration::from_millis(200));
        assert_eq!(poll.backoff_for(2), Duration::from_millis(400));
        assert_eq!(poll.backoff_for(3), Duration::from_millis(500));
        assert_eq!(poll.backoff_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://cert-manager.com/api");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.page_size, 200);
        assert!(config.requests_per_second.is_none());
        assert_eq!(config.poll, PollConfig::default());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = ClientConfig::load(Path::new("/tmp/nonexistent_certmgr_config.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_load_toml() {
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmpfile,
            r#"
customer_uri = "acme"
login = "operator"
page_size = 50
requests_per_second = 4

[poll]
max_attempts = 5
initial_backoff = 1.5
"#
        )
        .unwrap();

        let config = ClientConfig::load(tmpfile.path()).unwrap();
        assert_eq!(config.customer_uri, "acme");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.requests_per_second.map(NonZeroU32::get), Some(4));
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.initial_backoff, Duration::from_millis(1500));
        assert_eq!(config.poll.max_backoff, Duration::from_secs(900));
        assert!(config.builder("pw").is_ok());
    }

    #[test]
    fn builder_requires_account() {
        let err = ClientConfig::default().builder("pw").err().expect("builder should fail");
        assert!(matches!(err, CertManagerError::Config(_)));

        assert!(ClientConfig::from_toml("page_size = \"many\"").is_err());
    }
}
