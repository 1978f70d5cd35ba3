use serde::{Deserialize, Deserializer};

/// Identifier the API returns either as a JSON number or a JSON string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

/// Deserialize a number-or-string identifier into a `String`.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

/// Deserialize an optional number-or-string identifier.
pub fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Error body returned alongside non-2xx responses
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Numeric error code (negative values are API specific)
    #[serde(default)]
    pub code: Option<i64>,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,
}

/// Strip a single trailing root-label dot from a DNS name.
#[must_use]
pub fn normalize_name(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize_id")]
        id: String,
        #[serde(default, deserialize_with = "deserialize_opt_id")]
        other: Option<String>,
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let h: Holder = serde_json::from_str(r#"{"id": 1234, "other": "abc"}"#).unwrap();
        assert_eq!(h.id, "1234");
        assert_eq!(h.other.as_deref(), Some("abc"));

        let h: Holder = serde_json::from_str(r#"{"id": "x-9"}"#).unwrap();
        assert_eq!(h.id, "x-9");
        assert!(h.other.is_none());
    }

    #[test]
    fn trailing_dot_is_stripped_once() {
        assert_eq!(normalize_name("target.example.com."), "target.example.com");
        assert_eq!(normalize_name("target.example.com"), "target.example.com");
        assert_eq!(normalize_name("a.."), "a.");
        assert_eq!(normalize_name(""), "");
    }
}
