//! Context builder: one authenticated page fetch turned into a
//! [`SessionContext`].
//!
//! Either a complete valid context is produced or none is; nothing here
//! partially mutates shared state on failure. The only tolerated gap is a
//! missing anti-forgery token, which the refresh coordinator can recover
//! after login completes.

use std::sync::Arc;

use msgr_protocol::{ALT_USER_ID_COOKIE, SessionOptions, USER_ID_COOKIE};
use msgr_runtime::{CookieJar, HttpTransport};
use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use crate::context::{ContextSeed, SessionContext};
use crate::error::{Error, Result};
use crate::extract::{
    self, CURRENT_USER_CONTAINER, DEVICE_ID_CONTAINER, REALTIME_CONFIG_CONTAINER,
    VERSION_CONTAINER,
};

/// Root page the session bootstraps from.
pub const BASE_URL: &str = "https://www.facebook.com/";

/// Application id announced in task envelopes when the page does not
/// provide one.
pub const DEFAULT_APP_ID: &str = "2220391788200892";

/// Real-time endpoint used when the page's config block is missing.
pub const DEFAULT_REALTIME_ENDPOINT: &str = "wss://edge-chat.facebook.com/chat";

/// Bootstraps a session context from the platform's root page.
pub async fn bootstrap(
    http: &HttpTransport,
    jar: &Arc<CookieJar>,
    options: &SessionOptions,
) -> Result<SessionContext> {
    bootstrap_from(http, jar, options, BASE_URL).await
}

/// Same as [`bootstrap`] with an explicit page URL; tests point this at a
/// local fixture server.
pub async fn bootstrap_from(
    http: &HttpTransport,
    jar: &Arc<CookieJar>,
    options: &SessionOptions,
    base_url: &str,
) -> Result<SessionContext> {
    let response = http.get(base_url, &[]).await?;
    debug!(status = response.status, bytes = response.body.len(), "fetched bootstrap page");

    // The single most common failure mode: the login was blocked or the app
    // state is stale. Distinguish it loudly from network failure.
    let identity_cookie = jar
        .get(USER_ID_COOKIE)
        .or_else(|| jar.get(ALT_USER_ID_COOKIE));
    let Some(cookie_user_id) = identity_cookie else {
        return Err(Error::Authentication(format!(
            "no {USER_ID_COOKIE}/{ALT_USER_ID_COOKIE} cookie after the bootstrap fetch; \
             the remote did not recognize this session (expired app state or blocked login), \
             this is not a connectivity problem"
        )));
    };

    let docs = extract::parse_script_documents(&response.body);
    debug!(blocks = docs.len(), "parsed structured data blocks");

    let anti_forgery_token =
        match extract::extract_first(&extract::token_strategies(), &response.body, &docs) {
            Some(token) => token,
            None => {
                warn!("anti-forgery token not found in bootstrap page; deferring to token refresh");
                String::new()
            }
        };

    let device_id = extract::container_str(&docs, DEVICE_ID_CONTAINER, "clientID")
        .unwrap_or_else(|| {
            let generated = random_device_id();
            debug!(device_id = %generated, "page carried no device id, generated one");
            generated
        });

    let mut realtime_endpoint =
        extract::container_str(&docs, REALTIME_CONFIG_CONTAINER, "endpoint")
            .unwrap_or_else(|| DEFAULT_REALTIME_ENDPOINT.to_string());
    if let Some(region) = &options.bypass_region {
        realtime_endpoint = apply_region(&realtime_endpoint, region);
    }

    let app_id = extract::container_str(&docs, REALTIME_CONFIG_CONTAINER, "appID")
        .or_else(|| extract::container_str(&docs, CURRENT_USER_CONTAINER, "APP_ID"))
        .unwrap_or_else(|| DEFAULT_APP_ID.to_string());

    let version_id = extract::container_str(&docs, VERSION_CONTAINER, "version")
        .unwrap_or_else(|| "0".to_string());

    let user_id = options
        .page_id
        .clone()
        .unwrap_or_else(|| cookie_user_id.clone());

    info!(user_id = %user_id, endpoint = %realtime_endpoint, "session context assembled");
    Ok(SessionContext::new(ContextSeed {
        user_id,
        device_id,
        app_id,
        version_id,
        realtime_endpoint,
        anti_forgery_token,
        jar: Arc::clone(jar),
        options: options.clone(),
    }))
}

/// Rewrites the endpoint's region routing parameter.
fn apply_region(endpoint: &str, region: &str) -> String {
    let Ok(mut url) = Url::parse(endpoint) else {
        warn!(endpoint, "cannot parse realtime endpoint, leaving region untouched");
        return endpoint.to_string();
    };
    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "region")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(others.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .append_pair("region", &region.to_lowercase());
    url.to_string()
}

fn random_device_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.r#gen();
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}
