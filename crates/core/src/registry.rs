//! Named operation registry.
//!
//! Every session-level write operation is reachable by name with a JSON
//! parameter object, so embedders can expose the surface generically
//! (command routers, RPC bridges) without enumerating methods. Names are
//! stored sorted for stable listings.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::context::SessionContext;
use crate::error::{Error, Result};
use crate::realtime::RealtimeChannel;
use crate::refresh::TokenRefresher;

pub type OperationFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type OperationHandler = Arc<dyn Fn(Value) -> OperationFuture + Send + Sync>;

#[derive(Default)]
pub struct OperationRegistry {
    ops: RwLock<BTreeMap<String, OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one under the name.
    pub fn register(&self, name: impl Into<String>, handler: OperationHandler) {
        let name = name.into();
        debug!(%name, "registered operation");
        self.ops.write().insert(name, handler);
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.ops.read().keys().cloned().collect()
    }

    /// Invokes an operation by name. Unknown names fail with a validation
    /// error listing nothing sensitive, just the name.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        let handler = self
            .ops
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown operation `{name}`")))?;
        handler(params).await
    }
}

#[derive(Deserialize)]
struct EditMessageParams {
    message_id: String,
    text: String,
}

#[derive(Deserialize)]
struct ReactionParams {
    thread_id: String,
    message_id: String,
    #[serde(default)]
    reaction: String,
}

#[derive(Deserialize)]
struct ThemeParams {
    thread_id: String,
    theme_id: String,
}

#[derive(Deserialize)]
struct MarkReadParams {
    thread_id: String,
    timestamp_ms: i64,
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::Validation(format!("invalid operation parameters: {e}")))
}

/// Wires the built-in operations to a live channel and refresher.
pub(crate) fn install_builtins(
    registry: &OperationRegistry,
    channel: Arc<RealtimeChannel>,
    refresher: Arc<TokenRefresher>,
    ctx: Arc<SessionContext>,
) {
    {
        let channel = Arc::clone(&channel);
        registry.register(
            "edit_message",
            Arc::new(move |params| {
                let channel = Arc::clone(&channel);
                Box::pin(async move {
                    let p: EditMessageParams = parse(params)?;
                    channel.edit_message(&p.message_id, &p.text).await
                })
            }),
        );
    }
    {
        let channel = Arc::clone(&channel);
        registry.register(
            "set_message_reaction",
            Arc::new(move |params| {
                let channel = Arc::clone(&channel);
                Box::pin(async move {
                    let p: ReactionParams = parse(params)?;
                    channel
                        .set_message_reaction(&p.thread_id, &p.message_id, &p.reaction)
                        .await
                })
            }),
        );
    }
    {
        let channel = Arc::clone(&channel);
        registry.register(
            "set_theme",
            Arc::new(move |params| {
                let channel = Arc::clone(&channel);
                Box::pin(async move {
                    let p: ThemeParams = parse(params)?;
                    channel.set_theme(&p.thread_id, &p.theme_id).await
                })
            }),
        );
    }
    registry.register(
        "mark_read",
        Arc::new(move |params| {
            let channel = Arc::clone(&channel);
            Box::pin(async move {
                let p: MarkReadParams = parse(params)?;
                channel.mark_read(&p.thread_id, p.timestamp_ms).await
            })
        }),
    );
    registry.register(
        "refresh_tokens",
        Arc::new(move |_params| {
            let refresher = Arc::clone(&refresher);
            let ctx = Arc::clone(&ctx);
            Box::pin(async move {
                let refreshed = refresher.refresh(&ctx).await;
                Ok(json!({"refreshed": refreshed}))
            })
        }),
    );
}
