//! One-shot HTTP transport with a stable browser fingerprint.
//!
//! Every request carries the same header set for the lifetime of the
//! session; a fingerprint that changes per request is itself an automation
//! signal. Responses always have their `Set-Cookie` headers merged back into
//! the shared jar before the caller sees them.
//!
//! Retry policy: 5xx responses are retried with a uniform random backoff up
//! to five attempts, then surfaced with the last status and a body snippet.
//! 404 is a benign empty result. Redirects are followed manually so cookies
//! set along the redirect chain are not lost.

use std::sync::Arc;
use std::time::Duration;

use msgr_protocol::SessionOptions;
use rand::Rng;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::cookies::CookieJar;
use crate::error::{Result, TransportError};

/// Fallback fingerprint when the caller supplies none.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Pool drawn from when `random_user_agent` is set. All desktop Chrome/Edge
/// builds so the client-hint headers stay consistent.
const USER_AGENT_POOL: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
];

const MAX_REDIRECTS: usize = 10;
const ERROR_BODY_SNIPPET: usize = 200;

/// Retry bounds for server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Response surface exposed to callers. 404 comes back as a benign empty
/// body rather than an error.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Authenticated HTTP client bound to one session's jar and fingerprint.
pub struct HttpTransport {
    client: reqwest::Client,
    jar: Arc<CookieJar>,
    user_agent: String,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// Builds the client with the session's fingerprint headers chosen once.
    pub fn new(jar: Arc<CookieJar>, options: &SessionOptions) -> Result<Self> {
        let user_agent = match &options.user_agent {
            Some(ua) => ua.clone(),
            None if options.random_user_agent => {
                let index = rand::thread_rng().gen_range(0..USER_AGENT_POOL.len());
                USER_AGENT_POOL[index].to_string()
            }
            None => DEFAULT_USER_AGENT.to_string(),
        };

        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .default_headers(fingerprint_headers(&user_agent))
            .user_agent(user_agent.clone());
        if let Some(proxy) = &options.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| TransportError::Network(format!("invalid proxy {proxy}: {e}")))?,
            );
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            jar,
            user_agent,
            retry: RetryPolicy::default(),
        })
    }

    /// Overrides the retry bounds (tests shrink the backoff).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The fingerprint user-agent chosen for this session.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// GET with manual redirect following so every hop's cookies land in
    /// the jar.
    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut target = parse_url(url)?;
        if !query.is_empty() {
            target.query_pairs_mut().extend_pairs(query);
        }

        for _ in 0..MAX_REDIRECTS {
            let request = self
                .client
                .get(target.clone())
                .header(COOKIE, self.cookie_header(&target)?);
            let response = self.send_with_retry(request).await?;

            match response.next_location(&target) {
                Some(next) => {
                    debug!(from = %target, to = %next, "following redirect");
                    target = next;
                }
                None => return response.finish(),
            }
        }
        Err(TransportError::Network(format!(
            "redirect chain exceeded {MAX_REDIRECTS} hops for {url}"
        )))
    }

    /// POST with a urlencoded form body. Redirect responses are returned
    /// as-is; state-changing endpoints are never re-followed.
    pub async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse> {
        let target = parse_url(url)?;
        let request = self
            .client
            .post(target.clone())
            .header(COOKIE, self.cookie_header(&target)?)
            .form(form);
        self.send_with_retry(request).await?.finish()
    }

    /// POST with a JSON body.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        let target = parse_url(url)?;
        let request = self
            .client
            .post(target.clone())
            .header(COOKIE, self.cookie_header(&target)?)
            .json(body);
        self.send_with_retry(request).await?.finish()
    }

    fn cookie_header(&self, url: &Url) -> Result<HeaderValue> {
        let host = url.host_str().unwrap_or_default();
        HeaderValue::from_str(&self.jar.header_value(host))
            .map_err(|e| TransportError::Network(format!("unsendable cookie value: {e}")))
    }

    /// Sends one request, retrying on 5xx with randomized backoff. Merges
    /// response cookies into the jar on every attempt, including failures.
    async fn send_with_retry(&self, request: reqwest::RequestBuilder) -> Result<RawResponse> {
        let mut last: Option<(u16, String)> = None;
        for attempt in 1..=self.retry.max_attempts {
            let Some(request) = request.try_clone() else {
                return Err(TransportError::Network(
                    "request body cannot be replayed for retry".into(),
                ));
            };
            let response = request.send().await?;
            let status = response.status().as_u16();
            self.merge_response_cookies(&response);

            if !(500..=599).contains(&status) {
                let headers = response.headers().clone();
                let body = response.text().await?;
                return Ok(RawResponse {
                    status,
                    headers,
                    body,
                });
            }

            let body = response.text().await.unwrap_or_default();
            warn!(status, attempt, "server error, retrying");
            last = Some((status, body));

            if attempt < self.retry.max_attempts {
                let cap = self.retry.max_backoff.as_millis().max(1) as u64;
                let delay = rand::thread_rng().gen_range(0..cap);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        let (status, body) = last.unwrap_or((0, String::new()));
        Err(TransportError::Status {
            status,
            body: snippet(&body),
        })
    }

    fn merge_response_cookies(&self, response: &reqwest::Response) {
        let headers = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok());
        self.jar.merge_set_cookie_headers(headers);
    }
}

struct RawResponse {
    status: u16,
    headers: HeaderMap,
    body: String,
}

impl RawResponse {
    fn next_location(&self, base: &Url) -> Option<Url> {
        if !(300..=399).contains(&self.status) {
            return None;
        }
        let location = self.headers.get(LOCATION)?.to_str().ok()?;
        base.join(location).ok()
    }

    fn finish(self) -> Result<HttpResponse> {
        match self.status {
            200..=299 => Ok(HttpResponse {
                status: self.status,
                body: self.body,
            }),
            404 => Ok(HttpResponse {
                status: 404,
                body: String::new(),
            }),
            status => Err(TransportError::Status {
                status,
                body: snippet(&self.body),
            }),
        }
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| TransportError::Network(format!("invalid url {url}: {e}")))
}

fn snippet(body: &str) -> String {
    let mut end = body.len().min(ERROR_BODY_SNIPPET);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn fingerprint_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "accept",
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        "accept-language",
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    let platform = if user_agent.contains("Macintosh") {
        "\"macOS\""
    } else if user_agent.contains("X11") {
        "\"Linux\""
    } else {
        "\"Windows\""
    };
    if let Ok(value) = HeaderValue::from_str(platform) {
        headers.insert("sec-ch-ua-platform", value);
    }
    headers
}
