//! Task builders for the write operations carried over the real-time
//! channel, plus the corresponding convenience methods on
//! [`RealtimeChannel`].
//!
//! Labels and queue names are opaque identifiers observed on the wire.
//! They change when the platform ships a new client build; keep them in
//! one place so an update touches nothing else.

use msgr_protocol::{MessageEvent, Task};
use serde_json::{Value, json};

use super::RealtimeChannel;
use crate::error::Result;

const EDIT_MESSAGE_LABEL: &str = "742";
const EDIT_MESSAGE_QUEUE: &str = "edit_message";

const REACTION_LABEL: &str = "29";
const REACTION_QUEUE: &str = "messenger_reactions";

const THREAD_THEME_LABEL: &str = "1027";
const THREAD_THEME_QUEUE: &str = "thread_theme";

const READ_RECEIPT_LABEL: &str = "21";
const READ_RECEIPT_QUEUE: &str = "unread_threads";

const DELIVERY_RECEIPT_LABEL: &str = "165";
const DELIVERY_RECEIPT_QUEUE: &str = "delivery_receipts";

/// Replaces the text of a previously sent message.
pub fn edit_message_tasks(message_id: &str, new_text: &str) -> Vec<Task> {
    build_one(
        EDIT_MESSAGE_LABEL,
        EDIT_MESSAGE_QUEUE,
        &json!({
            "message_id": message_id,
            "text": new_text,
        }),
    )
}

/// Sets or clears (empty string) a reaction on a message.
pub fn set_reaction_tasks(
    thread_id: &str,
    message_id: &str,
    actor_id: &str,
    reaction: &str,
) -> Vec<Task> {
    build_one(
        REACTION_LABEL,
        REACTION_QUEUE,
        &json!({
            "thread_key": thread_id,
            "message_id": message_id,
            "actor_id": actor_id,
            "reaction": reaction,
            "reaction_style": Value::Null,
        }),
    )
}

/// Applies a theme to a thread.
pub fn set_theme_tasks(thread_id: &str, theme_id: &str) -> Vec<Task> {
    build_one(
        THREAD_THEME_LABEL,
        THREAD_THEME_QUEUE,
        &json!({
            "thread_key": thread_id,
            "theme_fbid": theme_id,
            "source": Value::Null,
        }),
    )
}

/// Marks a thread read up to `watermark_ts` (milliseconds).
pub fn read_receipt_tasks(thread_id: &str, watermark_ts: Option<i64>) -> Vec<Task> {
    build_one(
        READ_RECEIPT_LABEL,
        READ_RECEIPT_QUEUE,
        &json!({
            "thread_id": thread_id,
            "last_read_watermark_ts": watermark_ts,
            "sync_group": 1,
        }),
    )
}

/// Acknowledges delivery of one inbound message.
pub fn delivery_receipt_tasks(message: &MessageEvent) -> Vec<Task> {
    build_one(
        DELIVERY_RECEIPT_LABEL,
        DELIVERY_RECEIPT_QUEUE,
        &json!({
            "thread_id": message.thread_id,
            "message_id": message.message_id,
            "sync_group": 1,
        }),
    )
}

fn build_one(label: &str, queue: &str, params: &Value) -> Vec<Task> {
    // params come from json! literals, encoding cannot fail
    Task::new(label, queue, 0, params)
        .into_iter()
        .collect()
}

impl RealtimeChannel {
    /// Edits a sent message and waits for the acknowledgment.
    pub async fn edit_message(&self, message_id: &str, new_text: &str) -> Result<Value> {
        self.call(edit_message_tasks(message_id, new_text)).await
    }

    /// Sets a reaction on a message; an empty `reaction` removes it.
    pub async fn set_message_reaction(
        &self,
        thread_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<Value> {
        let actor_id = self.context().user_id().to_string();
        self.call(set_reaction_tasks(thread_id, message_id, &actor_id, reaction))
            .await
    }

    /// Changes the thread theme.
    pub async fn set_theme(&self, thread_id: &str, theme_id: &str) -> Result<Value> {
        self.call(set_theme_tasks(thread_id, theme_id)).await
    }

    /// Marks a thread read up to the given watermark.
    pub async fn mark_read(&self, thread_id: &str, watermark_ts: i64) -> Result<Value> {
        self.call(read_receipt_tasks(thread_id, Some(watermark_ts)))
            .await
    }
}
