use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod challenge;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod routes;
pub mod signature;
pub mod webhook;

pub const HEADER_MESSAGE_ID: &str = "Message-Id";
pub const HEADER_MESSAGE_TYPE: &str = "Message-Type";
pub const HEADER_MESSAGE_TIMESTAMP: &str = "Message-Timestamp";
pub const HEADER_MESSAGE_SIGNATURE: &str = "Message-Signature";

/// Kind of push message, taken from the `Message-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Notification,
    Challenge,
    Revocation,
}

impl MessageType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "notification" => Some(Self::Notification),
            "webhook_callback_verification" => Some(Self::Challenge),
            "revocation" => Some(Self::Revocation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Challenge => "webhook_callback_verification",
            Self::Revocation => "revocation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription<C> {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cost: i64,
    pub condition: C,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification<E, C> {
    pub subscription: Subscription<C>,
    pub event: E,
}

/// Routing key for a subscription type and version, e.g. `channel.chat.message.v1`.
pub fn routing_key(kind: &str, version: &str) -> String {
    format!("{}.v{}", kind, version).to_lowercase()
}
