//! Session facade tying the pieces together: cookie jar, HTTP transport,
//! bootstrapped context, real-time channel, operation registry, and the
//! periodic token refresh task.

use std::sync::Arc;

use msgr_protocol::{Event, SessionOptions};
use msgr_runtime::HttpTransport;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bootstrap;
use crate::context::SessionContext;
use crate::error::Result;
use crate::login::{self, Credentials};
use crate::realtime::{Connector, RealtimeChannel, WsConnector};
use crate::refresh::{REFRESH_INTERVAL, TokenRefresher};
use crate::registry::{self, OperationRegistry};

/// A logged-in session.
///
/// Dropping the client stops the background refresh task; the real-time
/// channel is only active between [`Client::listen`] and
/// [`Client::stop_listening`].
pub struct Client {
    ctx: Arc<SessionContext>,
    http: Arc<HttpTransport>,
    channel: Arc<RealtimeChannel>,
    registry: Arc<OperationRegistry>,
    refresh_task: JoinHandle<()>,
}

impl Client {
    /// Establishes a session: credential ingestion, bootstrap scrape, and
    /// background token refresh. The real-time channel is created but not
    /// dialed until [`Client::listen`].
    pub async fn login(credentials: Credentials, options: SessionOptions) -> Result<Self> {
        let (jar, http) = login::establish(credentials, &options).await?;
        let ctx = Arc::new(bootstrap::bootstrap(&http, &jar, &options).await?);
        info!(user_id = ctx.user_id(), "session established");

        let http = Arc::new(http);
        let refresher = Arc::new(TokenRefresher::new(Arc::clone(&http)));
        let refresh_task = Arc::clone(&refresher).spawn_interval(&ctx, REFRESH_INTERVAL);

        let channel = RealtimeChannel::new(Arc::clone(&ctx));
        channel.set_refresher(Arc::clone(&refresher));
        let registry = Arc::new(OperationRegistry::new());
        registry::install_builtins(
            &registry,
            Arc::clone(&channel),
            refresher,
            Arc::clone(&ctx),
        );

        Ok(Self {
            ctx,
            http,
            channel,
            registry,
            refresh_task,
        })
    }

    pub fn user_id(&self) -> &str {
        self.ctx.user_id()
    }

    pub fn options(&self) -> &SessionOptions {
        self.ctx.options()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Serialized cookie state, re-ingestable through
    /// [`Credentials::AppState`] in a later process.
    pub fn app_state(&self) -> String {
        self.ctx.jar().serialize()
    }

    /// Dials the real-time endpoint and returns the inbound event stream.
    pub fn listen(&self) -> Result<mpsc::UnboundedReceiver<Result<Event>>> {
        let connector = WsConnector::new(
            self.ctx.realtime_endpoint(),
            Arc::clone(self.ctx.jar()),
            self.http.user_agent(),
        );
        self.channel.start(Arc::new(connector) as Arc<dyn Connector>)
    }

    /// Closes the real-time channel and rejects its in-flight calls.
    pub async fn stop_listening(&self) {
        self.channel.stop_listening().await;
    }

    /// Invokes a named operation from the registry.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        self.registry.invoke(name, params).await
    }

    /// Ends the session locally: stops listening and clears the cookie
    /// jar, so the serialized app state of this client is empty afterwards.
    pub async fn logout(&self) {
        self.stop_listening().await;
        self.ctx.jar().clear();
        info!("logged out, cookie jar cleared");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.refresh_task.abort();
        self.channel.abort();
    }
}
