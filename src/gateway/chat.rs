//! Chat-messaging collaborator: text messages with optional inline buttons,
//! addressed by a numeric chat id or a string handle.

use anyhow::Result;
use async_trait::async_trait;

/// Button callback payloads round-trip through the transport as
/// `sc_{merchantId}_{action}` so an inbound click can be routed back to the
/// owning merchant's scenarios.
const CALLBACK_PREFIX: &str = "sc_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Id(i64),
    Handle(String),
}

impl ChatTarget {
    /// Numeric strings become ids, anything else is a handle (for example a
    /// channel username).
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(id) => ChatTarget::Id(id),
            Err(_) => ChatTarget::Handle(raw.to_string()),
        }
    }
}

impl std::fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatTarget::Id(id) => write!(f, "{id}"),
            ChatTarget::Handle(handle) => f.write_str(handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub target: ChatTarget,
    pub text: String,
    pub buttons: Vec<InlineButton>,
}

#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub message_id: i64,
}

/// Per-merchant transport configuration, resolved by the collaborator.
#[derive(Debug, Clone, Default)]
pub struct ChatSettings {
    /// False when the merchant has no working transport credentials.
    pub configured: bool,
    pub enabled: bool,
    /// Fallback chat when neither the step nor the trigger supplies one.
    pub default_chat: String,
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn settings(&self, merchant_id: i64) -> Result<ChatSettings>;

    async fn send(&self, merchant_id: i64, message: OutboundMessage) -> Result<DeliveredMessage>;
}

pub fn encode_callback(merchant_id: i64, action: &str) -> String {
    format!("{CALLBACK_PREFIX}{merchant_id}_{action}")
}

/// Parses `sc_{merchantId}_{action}`; `None` for anything else.
pub fn decode_callback(data: &str) -> Option<(i64, &str)> {
    let rest = data.strip_prefix(CALLBACK_PREFIX)?;
    let (merchant, action) = rest.split_once('_')?;
    Some((merchant.parse().ok()?, action))
}
