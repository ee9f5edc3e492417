//! Extraction of configuration out of the scraped bootstrap page.
//!
//! The page embeds structured JSON blocks whose layout is owned by the
//! provider and changes without notice, so nothing here is allowed to be a
//! single point of failure: the anti-forgery token is located by an ordered
//! chain of independent strategies, each returning an optional match, and
//! the first success wins. Adding a strategy is the expected response to
//! the provider moving things around again.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

/// Named configuration containers looked up in the structured blocks.
pub const TOKEN_CONTAINER: &str = "DTSGInitialData";
pub const DEVICE_ID_CONTAINER: &str = "MqttWebDeviceID";
pub const REALTIME_CONFIG_CONTAINER: &str = "MqttWebConfig";
pub const CURRENT_USER_CONTAINER: &str = "CurrentUserInitialData";
pub const VERSION_CONTAINER: &str = "LSVersion";

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script[^>]*type="application/json"[^>]*>(.*?)</script>"#)
        .expect("script block pattern is valid")
});

static FORM_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="fb_dtsg" value="([^"]+)""#).expect("form token pattern is valid")
});

static RAW_JSON_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"DTSGInitialData".{0,200}?"token":"([^"]+)""#)
        .expect("raw token pattern is valid")
});

/// One independent way of locating a value in the scraped page.
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, html: &str, docs: &[Value]) -> Option<String>;
}

/// Walks the parsed structured blocks for the token container.
pub struct StructuredTokenStrategy;

impl ExtractStrategy for StructuredTokenStrategy {
    fn name(&self) -> &'static str {
        "structured-container"
    }

    fn extract(&self, _html: &str, docs: &[Value]) -> Option<String> {
        find_container(docs, TOKEN_CONTAINER)?
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Matches the hidden form input the page renders for non-script clients.
pub struct FormInputStrategy;

impl ExtractStrategy for FormInputStrategy {
    fn name(&self) -> &'static str {
        "form-input"
    }

    fn extract(&self, html: &str, _docs: &[Value]) -> Option<String> {
        FORM_TOKEN
            .captures(html)
            .map(|caps| caps[1].to_string())
    }
}

/// Matches the container's JSON text directly, for pages where the block
/// failed to parse as a whole.
pub struct RawJsonStrategy;

impl ExtractStrategy for RawJsonStrategy {
    fn name(&self) -> &'static str {
        "raw-json"
    }

    fn extract(&self, html: &str, _docs: &[Value]) -> Option<String> {
        RAW_JSON_TOKEN
            .captures(html)
            .map(|caps| caps[1].to_string())
    }
}

/// The ordered chain used for the anti-forgery token.
pub fn token_strategies() -> Vec<Box<dyn ExtractStrategy>> {
    vec![
        Box::new(StructuredTokenStrategy),
        Box::new(FormInputStrategy),
        Box::new(RawJsonStrategy),
    ]
}

/// Tries each strategy in order and takes the first success.
pub fn extract_first(
    strategies: &[Box<dyn ExtractStrategy>],
    html: &str,
    docs: &[Value],
) -> Option<String> {
    for strategy in strategies {
        if let Some(value) = strategy.extract(html, docs) {
            debug!(strategy = strategy.name(), "extraction succeeded");
            return Some(value);
        }
        trace!(strategy = strategy.name(), "extraction missed");
    }
    None
}

/// Parses every embedded structured-data block into a JSON document,
/// skipping blocks that fail to parse. One bad block never aborts the
/// bootstrap.
pub fn parse_script_documents(html: &str) -> Vec<Value> {
    SCRIPT_BLOCK
        .captures_iter(html)
        .filter_map(|caps| match serde_json::from_str(&caps[1]) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(error = %e, "skipping unparseable script block");
                None
            }
        })
        .collect()
}

/// Finds a named configuration container in the nested declaration arrays:
/// any array of the form `[name, deps, {config}, ...]` anywhere in the
/// documents. Returns the config object.
pub fn find_container<'a>(docs: &'a [Value], name: &str) -> Option<&'a Value> {
    docs.iter().find_map(|doc| find_in_value(doc, name))
}

fn find_in_value<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Array(items) => {
            if items.len() >= 3
                && items[0].as_str() == Some(name)
                && items[2].is_object()
            {
                return Some(&items[2]);
            }
            items.iter().find_map(|item| find_in_value(item, name))
        }
        Value::Object(map) => map.values().find_map(|item| find_in_value(item, name)),
        _ => None,
    }
}

/// Convenience for string fields inside a located container.
pub fn container_str(docs: &[Value], container: &str, field: &str) -> Option<String> {
    let value = find_container(docs, container)?.get(field)?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_docs() -> Vec<Value> {
        vec![json!({
            "require": [
                ["ScheduledServerJS", "handle", null, [{
                    "__bbox": {
                        "require": [
                            ["DTSGInitialData", [], {"token": "AQz_structured:17"}, 3515],
                            ["MqttWebDeviceID", [], {"clientID": "device-abc"}, 5002],
                            ["MqttWebConfig", [], {
                                "endpoint": "wss://edge-chat.facebook.com/chat?region=odn",
                                "appID": 2220391788200892u64
                            }, 3790]
                        ]
                    }
                }]]
            ]
        })]
    }

    #[test]
    fn structured_strategy_walks_nested_declarations() {
        let docs = fixture_docs();
        let token = StructuredTokenStrategy.extract("", &docs).unwrap();
        assert_eq!(token, "AQz_structured:17");
    }

    #[test]
    fn form_input_strategy_matches_hidden_input() {
        let html = r#"<form><input type="hidden" name="fb_dtsg" value="AQz_form:9" /></form>"#;
        assert_eq!(
            FormInputStrategy.extract(html, &[]).unwrap(),
            "AQz_form:9"
        );
    }

    #[test]
    fn raw_json_strategy_survives_unparseable_blocks() {
        let html = r#"bla ["DTSGInitialData",[],{"token":"AQz_raw:3","async_get_token":"x"} garbage"#;
        assert_eq!(RawJsonStrategy.extract(html, &[]).unwrap(), "AQz_raw:3");
    }

    #[test]
    fn chain_prefers_the_structured_source() {
        let docs = fixture_docs();
        let html = r#"<input name="fb_dtsg" value="from-form" />"#;
        let token = extract_first(&token_strategies(), html, &docs).unwrap();
        assert_eq!(token, "AQz_structured:17");
    }

    #[test]
    fn chain_falls_back_in_order() {
        let html = r#"<input name="fb_dtsg" value="from-form" />"#;
        let token = extract_first(&token_strategies(), html, &[]).unwrap();
        assert_eq!(token, "from-form");
        assert!(extract_first(&token_strategies(), "nothing here", &[]).is_none());
    }

    #[test]
    fn script_documents_skip_bad_blocks() {
        let html = r#"
            <script type="application/json">{"ok": 1}</script>
            <script type="application/json">{broken</script>
            <script type="application/json">{"ok": 2}</script>
        "#;
        let docs = parse_script_documents(html);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["ok"], 2);
    }

    #[test]
    fn container_str_handles_numeric_fields() {
        let docs = fixture_docs();
        assert_eq!(
            container_str(&docs, REALTIME_CONFIG_CONTAINER, "appID").unwrap(),
            "2220391788200892"
        );
        assert_eq!(
            container_str(&docs, DEVICE_ID_CONTAINER, "clientID").unwrap(),
            "device-abc"
        );
        assert!(container_str(&docs, "NoSuchContainer", "x").is_none());
    }
}
