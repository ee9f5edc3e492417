//! Session cookie wire shape and the identity-cookie names the platform uses.

use serde::{Deserialize, Serialize};

/// Primary web domain the session is scoped to.
pub const PRIMARY_DOMAIN: &str = ".facebook.com";
/// Secondary domain serving the standalone messenger surface. Cookies must be
/// mirrored here because some endpoints are only addressable under it.
pub const SECONDARY_DOMAIN: &str = ".messenger.com";

/// Cookie carrying the numeric account identifier.
pub const USER_ID_COOKIE: &str = "c_user";
/// Cookie carrying the identifier of a secondary identity (page/profile)
/// when the account is acting on its behalf.
pub const ALT_USER_ID_COOKIE: &str = "i_user";
/// Cookie carrying the session secret. Without it the session is anonymous.
pub const SESSION_SECRET_COOKIE: &str = "xs";

/// A single session cookie as stored in the jar and in serialized app state.
///
/// Serialized camelCase to stay interchangeable with browser-extension
/// cookie exports, which is where most app states come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; `None` for session-scoped cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

fn default_domain() -> String {
    PRIMARY_DOMAIN.to_string()
}

fn default_path() -> String {
    "/".to_string()
}

impl SessionCookie {
    /// Creates a cookie scoped to the primary domain with path `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: default_domain(),
            path: default_path(),
            expires: None,
        }
    }

    /// Same cookie re-scoped to another domain.
    pub fn with_domain(&self, domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..self.clone()
        }
    }
}

/// Loose record shape accepted from JSON credential input: various exporters
/// disagree on whether the field is called `name` or `key`.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieRecord {
    #[serde(alias = "key")]
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub expires: Option<i64>,
}

impl From<CookieRecord> for SessionCookie {
    fn from(record: CookieRecord) -> Self {
        Self {
            name: record.name,
            value: record.value,
            domain: record.domain.unwrap_or_else(default_domain),
            path: record.path.unwrap_or_else(default_path),
            expires: record.expires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accepts_key_alias() {
        let record: CookieRecord =
            serde_json::from_str(r#"{"key": "c_user", "value": "100012345"}"#).unwrap();
        let cookie = SessionCookie::from(record);
        assert_eq!(cookie.name, "c_user");
        assert_eq!(cookie.value, "100012345");
        assert_eq!(cookie.domain, PRIMARY_DOMAIN);
        assert_eq!(cookie.path, "/");
    }

    #[test]
    fn serializes_camel_case_without_missing_expiry() {
        let json = serde_json::to_value(SessionCookie::new("xs", "secret")).unwrap();
        assert_eq!(json["name"], "xs");
        assert_eq!(json["domain"], PRIMARY_DOMAIN);
        assert!(json.get("expires").is_none());
    }
}
