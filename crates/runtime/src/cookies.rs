//! Credential ingestion and the shared session cookie jar.
//!
//! Credential input arrives in whatever shape the user managed to export
//! from their browser: a `;`/`,`/newline delimited string, a JSON array of
//! records, a JSON object map, or the tab-separated browser-export table.
//! [`normalize`] folds all of them into one canonical ordered cookie set;
//! [`validate_identity`] gates login on the two mandatory identity cookies.
//!
//! The [`CookieJar`] is the one mutable store shared by the HTTP and
//! real-time transports. Merges are last-write-wins by (name, domain);
//! insertion order of first-seen names is preserved.

use std::time::{SystemTime, UNIX_EPOCH};

use msgr_protocol::{
    ALT_USER_ID_COOKIE, CookieRecord, PRIMARY_DOMAIN, SECONDARY_DOMAIN, SESSION_SECRET_COOKIE,
    SessionCookie, USER_ID_COOKIE,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Parses any supported credential input format into a canonical cookie set.
///
/// Detection order: structural JSON cues first (leading `[` or `{`), then
/// the tab-separated export table (≥ 7 fields per line), then delimiter
/// heuristics. Pure; does not touch any jar.
pub fn normalize(input: &str) -> Result<Vec<SessionCookie>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidInput(
            "credential input is empty".into(),
        ));
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| TransportError::InvalidInput(format!("invalid JSON credentials: {e}")))?;
        return normalize_value(&value);
    }
    if looks_like_export(trimmed) {
        return parse_export(trimmed);
    }
    parse_delimited(trimmed)
}

/// Normalizes already-parsed JSON credentials: an array of cookie records or
/// a flat `{name: value}` object map.
pub fn normalize_value(value: &Value) -> Result<Vec<SessionCookie>> {
    let cookies = match value {
        Value::Array(items) => {
            let mut cookies = Vec::with_capacity(items.len());
            for item in items {
                let record: CookieRecord = serde_json::from_value(item.clone()).map_err(|e| {
                    TransportError::InvalidInput(format!("invalid cookie record: {e}"))
                })?;
                cookies.push(SessionCookie::from(record));
            }
            cookies
        }
        // map iteration follows source order (serde_json preserve_order)
        Value::Object(map) => map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                SessionCookie::new(name.clone(), value)
            })
            .collect(),
        _ => {
            return Err(TransportError::InvalidInput(
                "JSON credentials must be an array or object".into(),
            ));
        }
    };
    Ok(dedupe(cookies))
}

/// Fails unless the set carries an identity cookie (`c_user` or `i_user`)
/// and the session secret cookie (`xs`).
pub fn validate_identity(cookies: &[SessionCookie]) -> Result<()> {
    let has_identity = cookies
        .iter()
        .any(|c| c.name == USER_ID_COOKIE || c.name == ALT_USER_ID_COOKIE);
    let has_secret = cookies.iter().any(|c| c.name == SESSION_SECRET_COOKIE);
    match (has_identity, has_secret) {
        (true, true) => Ok(()),
        (false, _) => Err(TransportError::InvalidInput(format!(
            "missing identity cookie ({USER_ID_COOKIE}); the app state does not contain a logged-in session"
        ))),
        (_, false) => Err(TransportError::InvalidInput(format!(
            "missing session secret cookie ({SESSION_SECRET_COOKIE}); the app state is incomplete or expired"
        ))),
    }
}

fn looks_like_export(input: &str) -> bool {
    input
        .lines()
        .find(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .is_some_and(|line| line.split('\t').count() >= 7)
}

/// Tab-separated export rows: domain, flag, path, secure, expiry, name, value.
fn parse_export(input: &str) -> Result<Vec<SessionCookie>> {
    let mut cookies = Vec::new();
    for line in input.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            return Err(TransportError::InvalidInput(format!(
                "export row has {} fields, expected at least 7",
                fields.len()
            )));
        }
        let expires = fields[4].parse::<i64>().ok().filter(|&e| e > 0);
        cookies.push(SessionCookie {
            name: fields[5].to_string(),
            value: fields[6..].join("\t"),
            domain: fields[0].to_string(),
            path: fields[2].to_string(),
            expires,
        });
    }
    if cookies.is_empty() {
        return Err(TransportError::InvalidInput(
            "export-format credentials contained no cookie rows".into(),
        ));
    }
    Ok(dedupe(cookies))
}

fn parse_delimited(input: &str) -> Result<Vec<SessionCookie>> {
    let delimiter = if input.contains(';') {
        ';'
    } else if input.contains('\n') {
        '\n'
    } else {
        ','
    };
    let mut cookies = Vec::new();
    for pair in input.split(delimiter) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once('=') else {
            return Err(TransportError::InvalidInput(format!(
                "cookie pair {pair:?} is not in name=value form"
            )));
        };
        cookies.push(SessionCookie::new(name.trim(), value.trim()));
    }
    if cookies.is_empty() {
        return Err(TransportError::InvalidInput(
            "credential string contained no name=value pairs".into(),
        ));
    }
    Ok(dedupe(cookies))
}

/// Last occurrence wins, first-seen order preserved.
fn dedupe(cookies: Vec<SessionCookie>) -> Vec<SessionCookie> {
    let mut out: Vec<SessionCookie> = Vec::with_capacity(cookies.len());
    for cookie in cookies {
        if let Some(existing) = out
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain)
        {
            *existing = cookie;
        } else {
            out.push(cookie);
        }
    }
    out
}

/// Shared mutable cookie store for one logical session.
///
/// Interior locking keeps concurrent Set-Cookie merges from the HTTP and
/// real-time paths safe; last-write-wins per (name, domain) is the merge
/// policy, no transactional isolation.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<SessionCookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a jar from an already-normalized cookie set, mirroring each
    /// cookie onto the secondary domain.
    pub fn from_cookies(cookies: Vec<SessionCookie>) -> Self {
        let jar = Self::new();
        for cookie in cookies {
            jar.set(cookie);
        }
        jar
    }

    /// Upserts a cookie and keeps its secondary-domain mirror in sync.
    pub fn set(&self, cookie: SessionCookie) {
        let mirror = mirror_domain(&cookie.domain).map(|domain| cookie.with_domain(domain));
        let mut guard = self.cookies.write();
        upsert(&mut guard, cookie);
        if let Some(mirror) = mirror {
            upsert(&mut guard, mirror);
        }
    }

    /// First value for `name`, preferring the primary domain.
    pub fn get(&self, name: &str) -> Option<String> {
        let guard = self.cookies.read();
        guard
            .iter()
            .filter(|c| c.name == name)
            .min_by_key(|c| if c.domain.contains("facebook") { 0 } else { 1 })
            .map(|c| c.value.clone())
    }

    /// Parses and merges `Set-Cookie` header values from a response.
    pub fn merge_set_cookie_headers<'a>(&self, headers: impl IntoIterator<Item = &'a str>) {
        for header in headers {
            match parse_set_cookie(header) {
                Some(cookie) => {
                    debug!(name = %cookie.name, domain = %cookie.domain, "merging response cookie");
                    self.set(cookie);
                }
                None => debug!(header, "skipping unparseable Set-Cookie header"),
            }
        }
    }

    /// Renders the `Cookie:` header value for a request to `host`.
    pub fn header_value(&self, host: &str) -> String {
        let guard = self.cookies.read();
        let pairs: Vec<String> = guard
            .iter()
            .filter(|c| domain_matches(&c.domain, host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        pairs.join("; ")
    }

    /// Snapshot of the full cookie set.
    pub fn cookies(&self) -> Vec<SessionCookie> {
        self.cookies.read().clone()
    }

    /// Serializes the jar as a JSON app state the caller can persist and
    /// feed back into [`normalize`] on the next run.
    pub fn serialize(&self) -> String {
        serde_json::to_string(&*self.cookies.read()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Discards the entire set. Logout is the only path that does this;
    /// cookies are never deleted individually.
    pub fn clear(&self) {
        self.cookies.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }
}

fn upsert(cookies: &mut Vec<SessionCookie>, cookie: SessionCookie) {
    if let Some(existing) = cookies
        .iter_mut()
        .find(|c| c.name == cookie.name && c.domain == cookie.domain)
    {
        *existing = cookie;
    } else {
        cookies.push(cookie);
    }
}

/// The platform serves the same session under two domains; cookies set under
/// one must be visible under the other.
fn mirror_domain(domain: &str) -> Option<&'static str> {
    if domain.ends_with("facebook.com") {
        Some(SECONDARY_DOMAIN)
    } else if domain.ends_with("messenger.com") {
        Some(PRIMARY_DOMAIN)
    } else {
        None
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn parse_set_cookie(header: &str) -> Option<SessionCookie> {
    let mut segments = header.split(';');
    let (name, value) = segments.next()?.trim().split_once('=')?;
    if name.is_empty() {
        return None;
    }
    let mut cookie = SessionCookie::new(name.trim(), value.trim());
    for segment in segments {
        let (attr, attr_value) = match segment.trim().split_once('=') {
            Some((a, v)) => (a.trim(), v.trim()),
            None => continue,
        };
        match attr.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = attr_value.to_string(),
            "path" => cookie.path = attr_value.to_string(),
            "max-age" => {
                if let Ok(max_age) = attr_value.parse::<i64>() {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    cookie.expires = Some(now + max_age);
                }
            }
            _ => {}
        }
    }
    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_and_values(cookies: &[SessionCookie]) -> Vec<(String, String)> {
        cookies
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }

    #[test]
    fn all_formats_normalize_to_the_same_set() {
        let expected = vec![
            ("c_user".to_string(), "100012345".to_string()),
            ("xs".to_string(), "52%3Aabc".to_string()),
        ];

        let delimited = normalize("c_user=100012345; xs=52%3Aabc").unwrap();
        assert_eq!(names_and_values(&delimited), expected);

        let json_array = normalize(
            r#"[{"name": "c_user", "value": "100012345"}, {"key": "xs", "value": "52%3Aabc"}]"#,
        )
        .unwrap();
        assert_eq!(names_and_values(&json_array), expected);

        let json_object = normalize(r#"{"c_user": "100012345", "xs": "52%3Aabc"}"#).unwrap();
        assert_eq!(names_and_values(&json_object), expected);

        let export = normalize(
            ".facebook.com\tTRUE\t/\tTRUE\t0\tc_user\t100012345\n\
             .facebook.com\tTRUE\t/\tTRUE\t0\txs\t52%3Aabc",
        )
        .unwrap();
        assert_eq!(names_and_values(&export), expected);
    }

    #[test]
    fn validation_fails_without_identity_cookies_in_every_format() {
        for input in [
            "datr=xyz; sb=abc",
            r#"[{"name": "datr", "value": "xyz"}]"#,
            r#"{"datr": "xyz"}"#,
            ".facebook.com\tTRUE\t/\tTRUE\t0\tdatr\txyz",
        ] {
            let cookies = normalize(input).unwrap();
            let err = validate_identity(&cookies).unwrap_err();
            assert!(
                matches!(err, TransportError::InvalidInput(_)),
                "format {input:?} should fail validation"
            );
        }
    }

    #[test]
    fn missing_secret_is_reported_distinctly() {
        let cookies = normalize("c_user=1").unwrap();
        let err = validate_identity(&cookies).unwrap_err();
        assert!(err.to_string().contains("xs"));
    }

    #[test]
    fn last_write_wins_preserving_first_seen_order() {
        let cookies = normalize("a=1; b=2; a=3").unwrap();
        assert_eq!(
            names_and_values(&cookies),
            vec![
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn object_map_input_preserves_source_order() {
        let cookies = normalize(r#"{"xs": "52%3Aabc", "datr": "tok", "c_user": "100012345"}"#)
            .unwrap();
        assert_eq!(
            names_and_values(&cookies),
            vec![
                ("xs".to_string(), "52%3Aabc".to_string()),
                ("datr".to_string(), "tok".to_string()),
                ("c_user".to_string(), "100012345".to_string())
            ]
        );
    }

    #[test]
    fn newline_and_comma_delimiters_are_accepted() {
        let newline = normalize("a=1\nb=2").unwrap();
        let comma = normalize("a=1, b=2").unwrap();
        assert_eq!(names_and_values(&newline), names_and_values(&comma));
    }

    #[test]
    fn garbage_input_is_a_validation_error() {
        assert!(normalize("this is not a cookie string").is_err());
        assert!(normalize("").is_err());
        assert!(normalize("[{\"broken\": true}]").is_err());
    }

    #[test]
    fn jar_mirrors_cookies_onto_secondary_domain() {
        let jar = CookieJar::new();
        jar.set(SessionCookie::new("xs", "secret"));

        assert!(jar.header_value("www.facebook.com").contains("xs=secret"));
        assert!(jar.header_value("www.messenger.com").contains("xs=secret"));
        assert!(jar.header_value("example.com").is_empty());
    }

    #[test]
    fn set_cookie_merge_overwrites_by_name_and_domain() {
        let jar = CookieJar::from_cookies(vec![SessionCookie::new("xs", "old")]);
        jar.merge_set_cookie_headers([
            "xs=new; Path=/; Domain=.facebook.com; Secure; HttpOnly",
            "fr=fresh; Domain=.facebook.com; Max-Age=7776000",
            "malformed-header-without-equals-attr",
        ]);

        assert_eq!(jar.get("xs").as_deref(), Some("new"));
        assert_eq!(jar.get("fr").as_deref(), Some("fresh"));
        let fr = jar
            .cookies()
            .into_iter()
            .find(|c| c.name == "fr" && c.domain == PRIMARY_DOMAIN)
            .unwrap();
        assert!(fr.expires.is_some());
        // both domains see the overwrite
        assert!(jar.header_value("www.messenger.com").contains("xs=new"));
    }

    #[test]
    fn serialize_round_trips_through_normalize() {
        let jar = CookieJar::from_cookies(normalize("c_user=9; xs=s").unwrap());
        let state = jar.serialize();
        let reparsed = normalize(&state).unwrap();
        assert!(reparsed.iter().any(|c| c.name == "c_user" && c.value == "9"));
        assert!(reparsed.iter().any(|c| c.name == "xs"));
    }

    #[test]
    fn clear_discards_the_entire_set() {
        let jar = CookieJar::from_cookies(normalize("c_user=9; xs=s").unwrap());
        jar.clear();
        assert!(jar.is_empty());
        assert!(jar.get("c_user").is_none());
    }
}
