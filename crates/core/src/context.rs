//! The per-login session aggregate.
//!
//! One [`SessionContext`] is instantiated per login call and threaded
//! explicitly through every operation, never process-wide state, so
//! concurrent logins in one process cannot interfere. All durable
//! real-time state (tokens, sequence cursor, request counter, correlation
//! table) lives here so a reconnect can resume without re-bootstrapping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use msgr_protocol::SessionOptions;
use msgr_runtime::CookieJar;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};

/// Derives the lightweight checksum token from the anti-forgery token:
/// a counter seeded at 2 plus the code of every character, rendered as a
/// decimal string. Some legacy endpoints require it alongside the token.
pub fn derive_checksum(token: &str) -> String {
    let mut sum: u64 = 2;
    for c in token.chars() {
        sum += c as u64;
    }
    sum.to_string()
}

/// The anti-forgery token and its derived checksum. Always read and
/// replaced as a pair; one is never valid without the other matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub anti_forgery: String,
    pub checksum: String,
}

impl TokenPair {
    fn derive(anti_forgery: &str) -> Self {
        Self {
            anti_forgery: anti_forgery.to_string(),
            checksum: derive_checksum(anti_forgery),
        }
    }
}

/// Resume point for real-time delivery, updated from every delta batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceCursor {
    pub seq_id: Option<String>,
    pub sync_token: Option<String>,
}

/// One entry in the correlation table.
struct PendingRequest {
    issued_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Everything the context builder derived from the bootstrap page.
pub struct ContextSeed {
    pub user_id: String,
    pub device_id: String,
    pub app_id: String,
    pub version_id: String,
    pub realtime_endpoint: String,
    pub anti_forgery_token: String,
    pub jar: Arc<CookieJar>,
    pub options: SessionOptions,
}

/// Mutable aggregate owned by exactly one logical session.
pub struct SessionContext {
    user_id: String,
    device_id: String,
    app_id: String,
    version_id: String,
    realtime_endpoint: String,
    tokens: RwLock<TokenPair>,
    cursor: RwLock<SequenceCursor>,
    request_counter: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    jar: Arc<CookieJar>,
    options: SessionOptions,
}

impl SessionContext {
    pub fn new(seed: ContextSeed) -> Self {
        Self {
            user_id: seed.user_id,
            device_id: seed.device_id,
            app_id: seed.app_id,
            version_id: seed.version_id,
            realtime_endpoint: seed.realtime_endpoint,
            tokens: RwLock::new(TokenPair::derive(&seed.anti_forgery_token)),
            cursor: RwLock::new(SequenceCursor::default()),
            request_counter: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            jar: seed.jar,
            options: seed.options,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn realtime_endpoint(&self) -> &str {
        &self.realtime_endpoint
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Current token pair, read atomically.
    pub fn tokens(&self) -> TokenPair {
        self.tokens.read().clone()
    }

    /// Replaces the anti-forgery token and its checksum together. This is
    /// the only way either one changes.
    pub fn set_tokens(&self, anti_forgery: &str) {
        *self.tokens.write() = TokenPair::derive(anti_forgery);
    }

    pub fn cursor(&self) -> SequenceCursor {
        self.cursor.read().clone()
    }

    /// Merges cursor parts from a delta batch; absent parts keep their
    /// previous value.
    pub fn advance_cursor(&self, seq_id: Option<String>, sync_token: Option<String>) {
        let mut cursor = self.cursor.write();
        if seq_id.is_some() {
            cursor.seq_id = seq_id;
        }
        if sync_token.is_some() {
            cursor.sync_token = sync_token;
        }
    }

    /// Next outbound request id. Strictly increasing, never reused for the
    /// lifetime of the context, including across reconnects.
    pub fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers a pending entry and hands back the receiver the caller
    /// awaits on. The entry is consumed exactly once: by a matching
    /// response, an explicit eviction, or a bulk cancellation.
    pub fn register_pending(&self, id: u64, timeout: Duration) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        self.pending.lock().insert(
            id,
            PendingRequest {
                issued_at: now,
                deadline: now + timeout,
                tx,
            },
        );
        rx
    }

    /// Resolves and removes the entry for `id`. Returns false when no entry
    /// exists (already timed out, or an unsolicited push).
    pub fn complete_pending(&self, id: u64, result: Result<Value>) -> bool {
        let Some(entry) = self.pending.lock().remove(&id) else {
            return false;
        };
        debug!(id, elapsed_ms = entry.issued_at.elapsed().as_millis() as u64, "request correlated");
        let _ = entry.tx.send(result);
        true
    }

    /// Removes an entry without resolving it (the caller already gave up).
    pub fn evict_pending(&self, id: u64) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Rejects and removes every entry whose deadline has passed.
    pub fn expire_pending(&self, now: Instant) -> usize {
        let expired: Vec<(u64, PendingRequest)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        let count = expired.len();
        for (id, entry) in expired {
            let _ = entry
                .tx
                .send(Err(Error::Timeout(format!("realtime request {id}"))));
        }
        count
    }

    /// Bulk cancellation on disconnect: every pending caller is rejected
    /// and the table is left empty.
    pub fn fail_all_pending(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry
                .tx
                .send(Err(Error::ConnectionClosed(reason.to_string())));
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Records a provider-signaled cooldown for a request kind.
    pub fn note_cooldown(&self, queue: &str, duration: Duration) {
        self.cooldowns
            .lock()
            .insert(queue.to_string(), Instant::now() + duration);
    }

    /// Whether a cooldown is still in force for this request kind.
    pub fn cooldown_active(&self, queue: &str) -> bool {
        let mut cooldowns = self.cooldowns.lock();
        match cooldowns.get(queue) {
            Some(until) if *until > Instant::now() => true,
            Some(_) => {
                cooldowns.remove(queue);
                false
            }
            None => false,
        }
    }
}
