//! Shared utilities for session integration tests: a scripted one-connection
//! WebSocket server, EventSub message builders and a recording event sink.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use strom_client::{BoxFuture, DisconnectReason, EventSink, EventSubWs, WsConnector};
use strom_protocol::{NotificationMessage, RevocationMessage, WelcomeMessage};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use url::Url;

pub enum ServerAction {
	SendText(String),
	SendBinary(Vec<u8>),
	Close,
}

/// One-connection WebSocket server driven by the test.
///
/// Accepts a single client, performs the actions it is told to, and reports
/// the close frame the client eventually sends (if any).
pub struct ScriptedServer {
	pub url: String,
	actions: mpsc::UnboundedSender<ServerAction>,
	close_rx: oneshot::Receiver<Option<CloseFrame>>,
}

impl ScriptedServer {
	pub async fn start() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scripted server");
		let addr = listener.local_addr().expect("local addr");

		let (actions_tx, mut actions_rx) = mpsc::unbounded_channel::<ServerAction>();
		let (close_tx, close_rx) = oneshot::channel();

		tokio::spawn(async move {
			let Ok((stream, _peer)) = listener.accept().await else {
				return;
			};
			let Ok(mut ws) = accept_async(stream).await else {
				return;
			};
			let mut close_tx = Some(close_tx);

			loop {
				tokio::select! {
					action = actions_rx.recv() => {
						match action {
							Some(ServerAction::SendText(text)) => {
								if ws.send(Message::Text(text.into())).await.is_err() {
									break;
								}
							}
							Some(ServerAction::SendBinary(bytes)) => {
								if ws.send(Message::Binary(bytes.into())).await.is_err() {
									break;
								}
							}
							Some(ServerAction::Close) => {
								let _ = ws
									.close(Some(CloseFrame {
										code: CloseCode::Normal,
										reason: Default::default(),
									}))
									.await;
							}
							None => break,
						}
					}

					inbound = ws.next() => {
						match inbound {
							Some(Ok(Message::Close(frame))) => {
								if let Some(tx) = close_tx.take() {
									let _ = tx.send(frame);
								}
							}
							Some(Ok(_)) => {}
							Some(Err(_)) | None => break,
						}
					}
				}
			}
		});

		Self {
			url: format!("ws://{addr}"),
			actions: actions_tx,
			close_rx,
		}
	}

	pub fn send_text(&self, text: impl Into<String>) {
		let _ = self.actions.send(ServerAction::SendText(text.into()));
	}

	pub fn send_binary(&self, bytes: Vec<u8>) {
		let _ = self.actions.send(ServerAction::SendBinary(bytes));
	}

	pub fn close(&self) {
		let _ = self.actions.send(ServerAction::Close);
	}

	/// Wait for the close frame the client sent on this connection.
	pub async fn client_close(self) -> Option<CloseFrame> {
		tokio::time::timeout(Duration::from_secs(5), self.close_rx)
			.await
			.expect("timed out waiting for client close frame")
			.ok()
			.flatten()
	}
}

pub fn rfc3339(t: SystemTime) -> String {
	DateTime::<Utc>::from(t).to_rfc3339()
}

pub fn welcome_json(session_id: &str, message_id: &str, ts: SystemTime, keepalive: u64) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": message_id,
			"message_type": "session_welcome",
			"message_timestamp": rfc3339(ts),
		},
		"payload": {
			"session": {
				"id": session_id,
				"status": "connected",
				"connected_at": rfc3339(ts),
				"keepalive_timeout_seconds": keepalive,
				"reconnect_url": null,
			}
		}
	})
	.to_string()
}

pub fn keepalive_json(message_id: &str, ts: SystemTime) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": message_id,
			"message_type": "session_keepalive",
			"message_timestamp": rfc3339(ts),
		},
		"payload": {}
	})
	.to_string()
}

pub fn notification_json(message_id: &str, ts: SystemTime) -> String {
	notification_json_for(message_id, ts, "channel.chat.message")
}

pub fn notification_json_for(message_id: &str, ts: SystemTime, subscription_type: &str) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": message_id,
			"message_type": "notification",
			"message_timestamp": rfc3339(ts),
			"subscription_type": subscription_type,
			"subscription_version": "1",
		},
		"payload": {
			"subscription": {
				"id": "sub-1",
				"status": "enabled",
				"type": subscription_type,
				"version": "1",
				"condition": {"broadcaster_user_id": "1234"},
				"created_at": rfc3339(ts),
			},
			"event": {"message_id": "payload-msg", "chatter_user_login": "viewer"},
		}
	})
	.to_string()
}

pub fn revocation_json(message_id: &str, ts: SystemTime) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": message_id,
			"message_type": "revocation",
			"message_timestamp": rfc3339(ts),
			"subscription_type": "channel.chat.message",
		},
		"payload": {
			"subscription": {
				"id": "sub-1",
				"status": "authorization_revoked",
				"type": "channel.chat.message",
				"version": "1",
				"condition": {"broadcaster_user_id": "1234"},
				"created_at": rfc3339(ts),
			}
		}
	})
	.to_string()
}

pub fn reconnect_json(message_id: &str, ts: SystemTime, reconnect_url: Option<&str>) -> String {
	serde_json::json!({
		"metadata": {
			"message_id": message_id,
			"message_type": "session_reconnect",
			"message_timestamp": rfc3339(ts),
		},
		"payload": {
			"session": {
				"id": "sess-moving",
				"status": "reconnecting",
				"connected_at": rfc3339(ts),
				"reconnect_url": reconnect_url,
			}
		}
	})
	.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
	Connected(String),
	Notification(String),
	Revocation(String),
	Lost(DisconnectReason),
	UnknownMessageType(String),
	UnknownSubscriptionType(String),
	ParseFailed(String),
}

#[derive(Clone, Default)]
pub struct Recording {
	events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl Recording {
	pub fn snapshot(&self) -> Vec<SinkEvent> {
		self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	fn push(&self, event: SinkEvent) {
		self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
	}

	pub fn count(&self, wanted: &SinkEvent) -> usize {
		self.snapshot().iter().filter(|e| *e == wanted).count()
	}

	/// Poll until `pred` holds over the recorded events; panics after 5s.
	pub async fn wait_until(&self, what: &str, pred: impl Fn(&[SinkEvent]) -> bool) {
		let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
		loop {
			if pred(&self.snapshot()) {
				return;
			}
			if tokio::time::Instant::now() >= deadline {
				panic!("timed out waiting for {what}; events={:?}", self.snapshot());
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}
}

pub struct RecordingSink(pub Recording);

impl EventSink for RecordingSink {
	fn connected(&mut self, welcome: &WelcomeMessage) {
		self.0.push(SinkEvent::Connected(welcome.payload.session.id.clone()));
	}

	fn notification_received(&mut self, message: &NotificationMessage) {
		self.0.push(SinkEvent::Notification(message.metadata.message_id.clone()));
	}

	fn revocation_received(&mut self, message: &RevocationMessage) {
		self.0.push(SinkEvent::Revocation(message.metadata.message_id.clone()));
	}

	fn connection_lost(&mut self, reason: DisconnectReason) {
		self.0.push(SinkEvent::Lost(reason));
	}

	fn unknown_message_type(&mut self, message_type: &str) {
		self.0.push(SinkEvent::UnknownMessageType(message_type.to_string()));
	}

	fn unknown_subscription_type(&mut self, subscription_type: &str) {
		self.0.push(SinkEvent::UnknownSubscriptionType(subscription_type.to_string()));
	}

	fn message_parsing_failed(&mut self, error: &str) {
		self.0.push(SinkEvent::ParseFailed(error.to_string()));
	}
}

/// Connector that records every URL it dials before delegating to the real
/// `connect_async`.
pub fn tracking_connector(dialed: Arc<Mutex<Vec<String>>>) -> WsConnector {
	Arc::new(move |url: Url| {
		let dialed = Arc::clone(&dialed);
		Box::pin(async move {
			dialed.lock().unwrap_or_else(|e| e.into_inner()).push(url.to_string());
			let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
			Ok(ws)
		}) as BoxFuture<'static, anyhow::Result<EventSubWs>>
	})
}
