#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use strom_protocol::{ParseOutcome, ServerMessage};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::changeover::{self, Changeover};
use crate::clock::{Clock, SystemClock};
use crate::events::{DisconnectReason, EventSink};
use crate::framing;
use crate::ttl::TtlSet;
use crate::{BoxFuture, EventSubWs, WsConnector};

pub const DEFAULT_EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Slack granted past the keepalive interval before the watchdog fires.
const KEEPALIVE_GRACE: Duration = Duration::from_secs(3);

/// Watchdog interval until a welcome reports the real one.
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(600);

const MIN_KEEPALIVE_SECS: u64 = 10;
const MAX_KEEPALIVE_SECS: u64 = 600;

/// Messages older than this are treated as replays; doubles as the dedup window.
const MAX_MESSAGE_AGE: Duration = Duration::from_secs(10 * 60);

/// EventSub client configuration.
#[derive(Clone)]
pub struct ClientConfig {
	/// Base EventSub WebSocket URL.
	pub url: String,

	/// Requested keepalive interval in `[10, 600]`; appended to the URL as
	/// `keepalive_timeout_seconds` and used to size the watchdog until the
	/// welcome reports its own value.
	pub keepalive_timeout_seconds: Option<u64>,

	/// Liveness clock.
	pub clock: Arc<dyn Clock>,

	/// Socket factory override, mainly for tests.
	pub ws_connector: Option<WsConnector>,
}

impl ClientConfig {
	pub fn new() -> Self {
		Self {
			url: DEFAULT_EVENTSUB_URL.to_string(),
			keepalive_timeout_seconds: None,
			clock: Arc::new(SystemClock),
			ws_connector: None,
		}
	}
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self::new()
	}
}

/// A single EventSub WebSocket session.
///
/// `connect` runs until the session is lost, a protocol violation occurs or
/// the caller cancels; reconnect policy stays with the caller.
pub struct EventSubClient {
	cfg: ClientConfig,
	sink: Box<dyn EventSink>,
}

struct SessionState {
	keepalive: Duration,
	last_message_at: SystemTime,
	welcome_received: bool,
	seen_ids: TtlSet,
}

impl SessionState {
	fn new(keepalive_override: Option<u64>, clock: &Arc<dyn Clock>) -> Self {
		Self {
			keepalive: keepalive_override.map(Duration::from_secs).unwrap_or(DEFAULT_KEEPALIVE),
			last_message_at: clock.now(),
			welcome_received: false,
			seen_ids: TtlSet::new(MAX_MESSAGE_AGE, Arc::clone(clock)),
		}
	}

	/// Time until `last_message_at + keepalive + grace`, saturating at zero.
	fn watchdog_sleep(&self, now: SystemTime) -> Duration {
		let deadline = self.last_message_at + self.keepalive + KEEPALIVE_GRACE;
		deadline.duration_since(now).unwrap_or(Duration::ZERO)
	}
}

fn clamp_keepalive(reported_seconds: Option<u64>) -> Duration {
	let seconds = reported_seconds.unwrap_or(MAX_KEEPALIVE_SECS);
	Duration::from_secs(seconds.clamp(MIN_KEEPALIVE_SECS, MAX_KEEPALIVE_SECS))
}

async fn connect_eventsub_ws(url: Url) -> anyhow::Result<EventSubWs> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to eventsub ws")?;
	Ok(ws)
}

impl EventSubClient {
	pub fn new(cfg: ClientConfig, sink: Box<dyn EventSink>) -> Self {
		Self { cfg, sink }
	}

	fn connect_url(&self) -> anyhow::Result<Url> {
		let mut url = Url::parse(&self.cfg.url).context("parse eventsub ws url")?;

		if let Some(seconds) = self.cfg.keepalive_timeout_seconds {
			if !(MIN_KEEPALIVE_SECS..=MAX_KEEPALIVE_SECS).contains(&seconds) {
				anyhow::bail!(
					"keepalive_timeout_seconds must be within {MIN_KEEPALIVE_SECS}..={MAX_KEEPALIVE_SECS}, got {seconds}"
				);
			}
			url.query_pairs_mut()
				.append_pair("keepalive_timeout_seconds", &seconds.to_string());
		}

		Ok(url)
	}

	fn ws_connector(&self) -> WsConnector {
		if let Some(c) = &self.cfg.ws_connector {
			return c.clone();
		}

		Arc::new(|url: Url| Box::pin(connect_eventsub_ws(url)) as BoxFuture<'static, anyhow::Result<EventSubWs>>)
	}

	/// Connect and run the session until loss, violation or cancellation.
	///
	/// Transport loss emits `ConnectionLost` and returns `Ok`; protocol
	/// violations return `Err`; cancellation returns `Ok` with no event.
	pub async fn connect(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
		let url = self.connect_url()?;
		let connector = self.ws_connector();
		let clock = Arc::clone(&self.cfg.clock);

		let mut ws = tokio::select! {
			biased;

			_ = cancel.cancelled() => return Ok(()),
			connected = (connector)(url.clone()) => connected.context("connect eventsub ws")?,
		};
		info!(url = %url, "eventsub socket connected; waiting for session_welcome");

		let mut state = SessionState::new(self.cfg.keepalive_timeout_seconds, &clock);
		let mut pending_changeover: Option<JoinHandle<anyhow::Result<Changeover>>> = None;

		let result = run_session(
			&mut ws,
			&mut state,
			&mut pending_changeover,
			&connector,
			&clock,
			self.sink.as_mut(),
			&cancel,
		)
		.await;

		if let Some(handle) = pending_changeover.take() {
			handle.abort();
		}
		if cancel.is_cancelled() {
			let _ = ws.close(Some(framing::normal_closure())).await;
		}

		result
	}
}

async fn run_session(
	ws: &mut EventSubWs,
	state: &mut SessionState,
	pending_changeover: &mut Option<JoinHandle<anyhow::Result<Changeover>>>,
	connector: &WsConnector,
	clock: &Arc<dyn Clock>,
	sink: &mut dyn EventSink,
	cancel: &CancellationToken,
) -> anyhow::Result<()> {
	loop {
		let sleep_for = state.watchdog_sleep(clock.now());

		tokio::select! {
			biased;

			_ = cancel.cancelled() => {
				debug!("session cancelled by caller");
				return Ok(());
			}

			joined = async { pending_changeover.as_mut().expect("guarded by is_some").await }, if pending_changeover.is_some() => {
				*pending_changeover = None;
				let changeover = joined.context("join changeover task")??;
				apply_changeover(ws, state, changeover).await;
			}

			read = framing::read_text_message(ws) => {
				match read? {
					None => {
						info!("eventsub socket ended");
						sink.connection_lost(DisconnectReason::RemoteDisconnected);
						return Ok(());
					}
					Some(text) => handle_text(&text, state, pending_changeover, connector, clock, sink)?,
				}
			}

			_ = sleep(sleep_for) => {
				warn!(keepalive_seconds = state.keepalive.as_secs(), "keepalive watchdog fired");
				sink.connection_lost(DisconnectReason::KeepaliveTimeout);
				return Ok(());
			}
		}
	}
}

/// Swap in the replacement socket; the session continues without re-emitting
/// `Connected`.
async fn apply_changeover(ws: &mut EventSubWs, state: &mut SessionState, changeover: Changeover) {
	let mut old = std::mem::replace(ws, changeover.new_socket);

	state.keepalive = clamp_keepalive(changeover.welcome.payload.session.keepalive_timeout_seconds);
	state.last_message_at = changeover.welcome.metadata.timestamp_system_time();

	info!(
		session_id = %changeover.welcome.payload.session.id,
		keepalive_seconds = state.keepalive.as_secs(),
		"session migrated to replacement socket"
	);

	let _ = old.close(Some(framing::normal_closure())).await;
}

fn handle_text(
	text: &str,
	state: &mut SessionState,
	pending_changeover: &mut Option<JoinHandle<anyhow::Result<Changeover>>>,
	connector: &WsConnector,
	clock: &Arc<dyn Clock>,
	sink: &mut dyn EventSink,
) -> anyhow::Result<()> {
	let message = match strom_protocol::parse_message(text) {
		ParseOutcome::Message(message) => message,
		ParseOutcome::Malformed(reason) => {
			warn!(%reason, "failed to parse eventsub message");
			sink.message_parsing_failed(&reason);
			return Ok(());
		}
		ParseOutcome::UnknownMessageType(name) => {
			warn!(message_type = %name, "unknown eventsub message type");
			sink.unknown_message_type(&name);
			return Ok(());
		}
		ParseOutcome::UnknownSubscriptionType(name) => {
			warn!(subscription_type = %name, "notification for unknown subscription type");
			sink.unknown_subscription_type(&name);
			return Ok(());
		}
	};

	let metadata = message.metadata();
	let timestamp = metadata.timestamp_system_time();

	if clock
		.now()
		.duration_since(timestamp)
		.is_ok_and(|age| age > MAX_MESSAGE_AGE)
	{
		anyhow::bail!(
			"rejecting message {} older than {}s",
			metadata.message_id,
			MAX_MESSAGE_AGE.as_secs()
		);
	}

	if !state.seen_ids.add(&metadata.message_id) {
		debug!(message_id = %metadata.message_id, "dropping duplicate message");
		return Ok(());
	}

	state.last_message_at = timestamp;

	match message {
		ServerMessage::Welcome(welcome) => {
			if state.welcome_received {
				anyhow::bail!(
					"received a second session_welcome (session_id={})",
					welcome.payload.session.id
				);
			}
			state.welcome_received = true;
			state.keepalive = clamp_keepalive(welcome.payload.session.keepalive_timeout_seconds);
			info!(
				session_id = %welcome.payload.session.id,
				keepalive_seconds = state.keepalive.as_secs(),
				"eventsub session established"
			);
			sink.connected(&welcome);
		}

		other if !state.welcome_received => {
			anyhow::bail!(
				"expected session_welcome as first message, got {}",
				other.metadata().message_type
			);
		}

		ServerMessage::Notification(message) => sink.notification_received(&message),

		ServerMessage::Revocation(message) => sink.revocation_received(&message),

		ServerMessage::Reconnect(message) => {
			let Some(reconnect_url) = message.payload.session.reconnect_url.clone() else {
				anyhow::bail!("session_reconnect without reconnect_url");
			};

			if pending_changeover.is_some() {
				debug!("changeover already in flight; ignoring session_reconnect");
			} else {
				info!(%reconnect_url, "session_reconnect received; opening replacement socket");
				*pending_changeover = Some(tokio::spawn(changeover::perform_changeover(
					Arc::clone(connector),
					reconnect_url,
				)));
			}
		}

		ServerMessage::Keepalive(_) => debug!("eventsub keepalive"),
	}

	Ok(())
}
