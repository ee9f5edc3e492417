//! Token refresh coordinator.
//!
//! The anti-forgery token rotates server-side; this re-scrapes it from
//! the bootstrap page and swaps the token pair atomically. Failures are
//! absorbed and logged, never propagated to unrelated in-flight work; a
//! stale token is preferable to cascading failure, and the next operation
//! that hits a token-rejection triggers another attempt.

use std::sync::{Arc, Weak};
use std::time::Duration;

use msgr_runtime::HttpTransport;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bootstrap::BASE_URL;
use crate::context::SessionContext;
use crate::extract;

/// Fixed refresh cadence, independent of request volume.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TokenRefresher {
    http: Arc<HttpTransport>,
    base_url: String,
}

impl TokenRefresher {
    pub fn new(http: Arc<HttpTransport>) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Points the refresher at a different bootstrap page (tests).
    pub fn with_base_url(http: Arc<HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Re-extracts the anti-forgery token and replaces the token pair.
    /// Returns true on success; on failure the existing tokens stay in
    /// place untouched.
    pub async fn refresh(&self, ctx: &SessionContext) -> bool {
        let response = match self.http.get(&self.base_url, &[]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "token refresh fetch failed, keeping current tokens");
                return false;
            }
        };

        let docs = extract::parse_script_documents(&response.body);
        match extract::extract_first(&extract::token_strategies(), &response.body, &docs) {
            Some(token) if !token.is_empty() => {
                ctx.set_tokens(&token);
                info!("anti-forgery token rotated");
                true
            }
            _ => {
                warn!("token refresh found no token in page, keeping current tokens");
                false
            }
        }
    }

    /// One on-demand attempt after an operation saw a token-rejection
    /// code. Callers retry their request once when this returns true and
    /// otherwise surface their original error.
    pub async fn refresh_after_rejection(&self, ctx: &SessionContext) -> bool {
        debug!("token rejection detected, attempting on-demand refresh");
        self.refresh(ctx).await
    }

    /// Periodic refresh task. Holds only a weak context reference so the
    /// task dies with the session instead of keeping it alive.
    pub fn spawn_interval(
        self: Arc<Self>,
        ctx: &Arc<SessionContext>,
        period: Duration,
    ) -> JoinHandle<()> {
        let ctx = Arc::downgrade(ctx);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                let Some(ctx) = Weak::upgrade(&ctx) else {
                    debug!("session context dropped, stopping token refresh task");
                    break;
                };
                self.refresh(&ctx).await;
            }
        })
    }
}
