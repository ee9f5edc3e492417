//! Inbound frames and their normalized event forms.
//!
//! Frames arrive on fixed topics. The delta topic multiplexes many event
//! classes inside one batch; each known class has its own decoder. Unknown
//! classes are skipped by the decoders (callers log them) because the
//! provider adds classes without notice and an unknown frame must never
//! break delivery of the rest of the batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic carrying delta batches (messages, receipts, thread changes).
pub const DELTA_TOPIC: &str = "/t_ms";
/// Topic carrying typing indicators.
pub const TYPING_TOPIC: &str = "/thread_typing";
/// Topic carrying presence rosters.
pub const PRESENCE_TOPIC: &str = "/orca_presence";
/// Topic announcing the client's foreground state.
pub const FOREGROUND_TOPIC: &str = "/ls_foreground_state";
/// Topic used to create/resume the server-side delivery queue.
pub const SYNC_QUEUE_TOPIC: &str = "/messenger_sync_create_queue";

/// One raw frame as carried by the pub/sub transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub payload: Value,
}

impl Frame {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Acknowledgment frame on the response topic, tagged with the request id
/// of the envelope it answers.
#[derive(Debug, Clone, Deserialize)]
pub struct AckFrame {
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Batch shape on the delta topic. The cursor fields accompany the deltas
/// and are the resume point for the next (re)subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaBatch {
    #[serde(default)]
    pub deltas: Vec<Value>,
    #[serde(rename = "lastIssuedSeqId", default)]
    pub last_issued_seq_id: Option<Value>,
    #[serde(rename = "firstDeltaSeqId", default)]
    pub first_delta_seq_id: Option<Value>,
    #[serde(rename = "syncToken", default)]
    pub sync_token: Option<String>,
}

/// A normalized new-message event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub message_id: String,
    pub sender_id: String,
    pub thread_id: String,
    pub body: String,
    pub attachments: Vec<Value>,
    pub timestamp: Option<i64>,
    pub is_group: bool,
}

/// Normalized inbound events delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(MessageEvent),
    Typing {
        sender_id: String,
        thread_id: String,
        is_typing: bool,
    },
    ReadReceipt {
        reader_id: String,
        thread_id: String,
        timestamp: Option<i64>,
    },
    Delivery {
        thread_id: String,
        delivered_message_ids: Vec<String>,
    },
    Presence {
        user_id: String,
        /// Raw status code as sent by the provider (0 offline, 2 active).
        status: i64,
        last_active: Option<i64>,
    },
    ThreadName {
        thread_id: String,
        name: String,
        author_id: String,
    },
    ParticipantsAdded {
        thread_id: String,
        added_ids: Vec<String>,
        author_id: String,
    },
    ParticipantLeft {
        thread_id: String,
        left_id: String,
        author_id: String,
    },
    /// The server discarded the delivery queue; the next subscription starts
    /// from a fresh cursor and events in between are lost.
    Resync { reason: Option<String> },
}

/// Decodes every known delta in a batch, preserving batch order.
pub fn decode_deltas(batch: &DeltaBatch) -> Vec<Event> {
    batch.deltas.iter().filter_map(decode_delta).collect()
}

/// Decodes one delta by its `class` discriminator. Returns `None` for
/// unknown classes and for known classes with missing mandatory fields.
pub fn decode_delta(delta: &Value) -> Option<Event> {
    match delta.get("class").and_then(Value::as_str)? {
        "NewMessage" => decode_new_message(delta),
        "ReadReceipt" => {
            let meta = delta;
            Some(Event::ReadReceipt {
                reader_id: id_field(meta.get("actorFbId")?)?,
                thread_id: thread_key_id(meta.get("threadKey")?)?,
                timestamp: int_field(meta.get("actionTimestampMs")),
            })
        }
        "DeliveryReceipt" => Some(Event::Delivery {
            thread_id: thread_key_id(delta.get("threadKey")?)?,
            delivered_message_ids: delta
                .get("messageIds")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "ThreadName" => {
            let meta = delta.get("messageMetadata")?;
            Some(Event::ThreadName {
                thread_id: thread_key_id(meta.get("threadKey")?)?,
                name: delta.get("name")?.as_str()?.to_string(),
                author_id: id_field(meta.get("actorFbId")?)?,
            })
        }
        "ParticipantsAddedToGroupThread" => {
            let meta = delta.get("messageMetadata")?;
            Some(Event::ParticipantsAdded {
                thread_id: thread_key_id(meta.get("threadKey")?)?,
                added_ids: delta
                    .get("addedParticipants")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|p| p.get("userFbId").and_then(id_field))
                            .collect()
                    })
                    .unwrap_or_default(),
                author_id: id_field(meta.get("actorFbId")?)?,
            })
        }
        "ParticipantLeftGroupThread" => {
            let meta = delta.get("messageMetadata")?;
            Some(Event::ParticipantLeft {
                thread_id: thread_key_id(meta.get("threadKey")?)?,
                left_id: delta.get("leftParticipantFbId").and_then(id_field)?,
                author_id: id_field(meta.get("actorFbId")?)?,
            })
        }
        "ForcedFetch" => Some(Event::Resync {
            reason: delta
                .get("threadKey")
                .and_then(thread_key_id)
                .map(|t| format!("forced fetch for thread {t}")),
        }),
        _ => None,
    }
}

fn decode_new_message(delta: &Value) -> Option<Event> {
    let meta = delta.get("messageMetadata")?;
    let thread_key = meta.get("threadKey")?;
    Some(Event::Message(MessageEvent {
        message_id: meta.get("messageId")?.as_str()?.to_string(),
        sender_id: id_field(meta.get("actorFbId")?)?,
        thread_id: thread_key_id(thread_key)?,
        body: delta
            .get("body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        attachments: delta
            .get("attachments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        timestamp: int_field(meta.get("timestamp")),
        is_group: thread_key.get("threadFbId").is_some(),
    }))
}

/// Decodes a typing-topic frame.
pub fn decode_typing(payload: &Value) -> Option<Event> {
    Some(Event::Typing {
        sender_id: payload.get("sender_fbid").and_then(id_field)?,
        thread_id: payload
            .get("thread")
            .and_then(id_field)
            .or_else(|| payload.get("sender_fbid").and_then(id_field))?,
        is_typing: payload.get("state").and_then(Value::as_i64)? == 1,
    })
}

/// Decodes a presence roster frame into one event per roster entry.
pub fn decode_presence(payload: &Value) -> Vec<Event> {
    payload
        .get("list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    Some(Event::Presence {
                        user_id: entry.get("u").and_then(id_field)?,
                        status: entry.get("p").and_then(Value::as_i64)?,
                        last_active: int_field(entry.get("l")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Thread identifiers arrive either as `threadFbId` (group) or
/// `otherUserFbId` (one-to-one).
fn thread_key_id(thread_key: &Value) -> Option<String> {
    thread_key
        .get("threadFbId")
        .or_else(|| thread_key.get("otherUserFbId"))
        .and_then(id_field)
}

/// The provider sends ids inconsistently as JSON strings or numbers.
fn id_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
