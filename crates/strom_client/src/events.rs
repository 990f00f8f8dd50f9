#![forbid(unsafe_code)]

use strom_protocol::{NotificationMessage, RevocationMessage, WelcomeMessage};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
	/// No traffic arrived within keepalive + grace.
	KeepaliveTimeout,

	/// The peer closed the socket or the transport dropped.
	RemoteDisconnected,
}

/// Observer for session events and diagnostics.
///
/// Callbacks run synchronously on the session task; a panicking handler
/// takes the session down with it.
pub trait EventSink: Send {
	/// The initial socket completed its welcome handshake.
	///
	/// Fires once per session; endpoint changeovers do not re-fire it.
	fn connected(&mut self, _welcome: &WelcomeMessage) {}

	fn notification_received(&mut self, _message: &NotificationMessage) {}

	fn revocation_received(&mut self, _message: &RevocationMessage) {}

	/// Final event of a session; fires at most once.
	fn connection_lost(&mut self, _reason: DisconnectReason) {}

	fn unknown_message_type(&mut self, _message_type: &str) {}

	fn unknown_subscription_type(&mut self, _subscription_type: &str) {}

	fn message_parsing_failed(&mut self, _error: &str) {}
}
