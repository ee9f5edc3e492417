//! Session options recognized by the login entry point.

use serde::{Deserialize, Serialize};

/// Caller-facing configuration for one logical session.
///
/// Serialized camelCase so option objects persisted by earlier clients of
/// the platform parse unchanged. Every field is defaulted; an empty object
/// is a valid option set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Deliver the session's own outbound messages back as inbound events.
    pub self_listen: bool,
    /// Enable thread/admin event categories on the real-time channel.
    pub listen_events: bool,
    /// Enable typing indicator delivery.
    pub listen_typing: bool,
    /// Enable presence roster delivery.
    pub update_presence: bool,
    /// Acknowledge inbound messages as read automatically.
    pub auto_mark_read: bool,
    /// Acknowledge inbound messages as delivered automatically.
    pub auto_mark_delivery: bool,
    /// Reconnect the real-time channel automatically after a drop.
    pub auto_reconnect: bool,
    /// Announce presence as available when the channel connects.
    pub online: bool,
    /// Fixed user-agent override for the session fingerprint.
    pub user_agent: Option<String>,
    /// Pick the session user-agent at random from the built-in pool.
    pub random_user_agent: bool,
    /// Outbound proxy URL.
    pub proxy: Option<String>,
    /// Region override for the real-time endpoint routing parameter.
    pub bypass_region: Option<String>,
    /// Operate on behalf of a secondary identity (page).
    pub page_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            self_listen: false,
            listen_events: true,
            listen_typing: false,
            update_presence: false,
            auto_mark_read: false,
            auto_mark_delivery: true,
            auto_reconnect: true,
            online: true,
            user_agent: None,
            random_user_agent: false,
            proxy: None,
            bypass_region: None,
            page_id: None,
        }
    }
}
