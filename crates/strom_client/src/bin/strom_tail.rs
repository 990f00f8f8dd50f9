#![forbid(unsafe_code)]

use strom_client::{ClientConfig, DisconnectReason, EventSink, EventSubClient};
use strom_protocol::{NotificationMessage, RevocationMessage, WelcomeMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: strom_tail [--url wss://host/path] [--keepalive seconds]\n\
\n\
Options:\n\
\t--url        EventSub WebSocket URL (default: wss://eventsub.wss.twitch.tv/ws)\n\
\t--keepalive  Requested keepalive interval in seconds (10..=600)\n\
\t--help       Show this help\n\
\n\
Tails one EventSub session to the log until the session ends or Ctrl-C.\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,strom_client=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_args() -> ClientConfig {
	let mut cfg = ClientConfig::new();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--url" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--url must be non-empty");
					usage_and_exit();
				}
				cfg.url = v;
			}
			"--keepalive" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let seconds: u64 = v.parse().unwrap_or_else(|_| {
					eprintln!("Invalid --keepalive value: {v}");
					usage_and_exit()
				});
				cfg.keepalive_timeout_seconds = Some(seconds);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	cfg
}

struct LogSink;

impl EventSink for LogSink {
	fn connected(&mut self, welcome: &WelcomeMessage) {
		info!(session_id = %welcome.payload.session.id, "connected");
	}

	fn notification_received(&mut self, message: &NotificationMessage) {
		info!(
			message_id = %message.metadata.message_id,
			subscription_type = %message.payload.subscription.kind,
			event = %message.payload.event,
			"notification"
		);
	}

	fn revocation_received(&mut self, message: &RevocationMessage) {
		warn!(
			subscription_id = %message.payload.subscription.id,
			status = %message.payload.subscription.status,
			"subscription revoked"
		);
	}

	fn connection_lost(&mut self, reason: DisconnectReason) {
		warn!(reason = ?reason, "connection lost");
	}

	fn unknown_message_type(&mut self, message_type: &str) {
		warn!(%message_type, "unknown message type");
	}

	fn unknown_subscription_type(&mut self, subscription_type: &str) {
		warn!(%subscription_type, "unknown subscription type");
	}

	fn message_parsing_failed(&mut self, error: &str) {
		warn!(%error, "message parsing failed");
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let cfg = parse_args();
	let client = EventSubClient::new(cfg, Box::new(LogSink));

	let cancel = CancellationToken::new();
	let signal_cancel = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("ctrl-c received; shutting down");
			signal_cancel.cancel();
		}
	});

	client.connect(cancel).await
}
