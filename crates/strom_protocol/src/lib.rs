#![forbid(unsafe_code)]

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// EventSub metadata (present on all WebSocket messages).
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
	pub message_id: String,
	pub message_type: String,
	pub message_timestamp: DateTime<Utc>,

	#[serde(default)]
	pub subscription_type: Option<String>,
	#[serde(default)]
	pub subscription_version: Option<String>,
}

impl Metadata {
	/// The wire timestamp as `SystemTime` (EventSub timestamps are RFC3339 UTC).
	pub fn timestamp_system_time(&self) -> SystemTime {
		SystemTime::from(self.message_timestamp)
	}
}

/// A lightweight peek struct to cheaply inspect message_type/subscription_type.
#[derive(Debug, Deserialize)]
struct MetadataPeek {
	metadata: MetadataPeekInner,
}

#[derive(Debug, Deserialize)]
struct MetadataPeekInner {
	message_type: String,
	#[serde(default)]
	subscription_type: Option<String>,
}

/// Session descriptor carried by welcome and reconnect payloads.
///
/// `reconnect_url` is only populated on `session_reconnect`.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
	pub id: String,
	pub status: String,
	pub connected_at: String,

	#[serde(default)]
	pub keepalive_timeout_seconds: Option<u64>,

	#[serde(default)]
	pub reconnect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionPayload {
	pub session: Session,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeMessage {
	pub metadata: Metadata,
	pub payload: SessionPayload,
}

/// Keepalive payload is empty on the wire; only the metadata matters.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveMessage {
	pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectMessage {
	pub metadata: Metadata,
	pub payload: SessionPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
	pub id: String,
	pub status: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub version: String,
	pub condition: serde_json::Value,
	pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
	pub subscription: Subscription,

	/// Event body; decoding it is the consumer's concern.
	pub event: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationMessage {
	pub metadata: Metadata,
	pub payload: NotificationPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationPayload {
	pub subscription: Subscription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationMessage {
	pub metadata: Metadata,
	pub payload: RevocationPayload,
}

/// A fully decoded EventSub message.
#[derive(Debug, Clone)]
pub enum ServerMessage {
	Welcome(WelcomeMessage),
	Keepalive(KeepaliveMessage),
	Reconnect(ReconnectMessage),
	Notification(NotificationMessage),
	Revocation(RevocationMessage),
}

impl ServerMessage {
	pub fn metadata(&self) -> &Metadata {
		match self {
			Self::Welcome(m) => &m.metadata,
			Self::Keepalive(m) => &m.metadata,
			Self::Reconnect(m) => &m.metadata,
			Self::Notification(m) => &m.metadata,
			Self::Revocation(m) => &m.metadata,
		}
	}
}

/// Outcome of classifying one raw text message.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
	Message(ServerMessage),

	/// The message could not be decoded at all.
	Malformed(String),

	/// `metadata.message_type` is not one we recognise.
	UnknownMessageType(String),

	/// A notification for a subscription type we do not handle.
	UnknownSubscriptionType(String),
}

/// Subscription types this client knows how to deliver.
const KNOWN_SUBSCRIPTION_TYPES: &[&str] = &[
	"channel.chat.message",
	"channel.chat.message_delete",
	"channel.ban",
	"channel.moderate",
	"channel.raid",
	"channel.cheer",
	"channel.subscribe",
];

pub fn is_known_subscription_type(name: &str) -> bool {
	KNOWN_SUBSCRIPTION_TYPES.contains(&name)
}

fn decode<'de, T: Deserialize<'de>>(raw: &'de str, what: &str) -> Result<T, String> {
	serde_json::from_str(raw).map_err(|e| format!("parse {what}: {e}"))
}

/// Classify and decode one raw EventSub WS JSON string.
pub fn parse_message(raw: &str) -> ParseOutcome {
	let peek: MetadataPeek = match serde_json::from_str(raw) {
		Ok(p) => p,
		Err(e) => return ParseOutcome::Malformed(format!("parse metadata: {e}")),
	};

	let decoded = match peek.metadata.message_type.as_str() {
		"session_welcome" => decode::<WelcomeMessage>(raw, "session_welcome").map(ServerMessage::Welcome),
		"session_keepalive" => decode::<KeepaliveMessage>(raw, "session_keepalive").map(ServerMessage::Keepalive),
		"session_reconnect" => decode::<ReconnectMessage>(raw, "session_reconnect").map(ServerMessage::Reconnect),
		"revocation" => decode::<RevocationMessage>(raw, "revocation").map(ServerMessage::Revocation),
		"notification" => {
			let Some(subscription_type) = peek.metadata.subscription_type else {
				return ParseOutcome::Malformed("notification without metadata.subscription_type".to_string());
			};
			if !is_known_subscription_type(&subscription_type) {
				return ParseOutcome::UnknownSubscriptionType(subscription_type);
			}
			decode::<NotificationMessage>(raw, "notification").map(ServerMessage::Notification)
		}
		other => return ParseOutcome::UnknownMessageType(other.to_string()),
	};

	match decoded {
		Ok(message) => ParseOutcome::Message(message),
		Err(reason) => ParseOutcome::Malformed(reason),
	}
}
