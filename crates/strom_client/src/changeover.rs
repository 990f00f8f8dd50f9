#![forbid(unsafe_code)]

use anyhow::Context;
use strom_protocol::{ParseOutcome, ServerMessage, WelcomeMessage};
use tracing::debug;
use url::Url;

use crate::framing;
use crate::{EventSubWs, WsConnector};

/// A replacement socket whose first message was a welcome.
pub(crate) struct Changeover {
	pub(crate) new_socket: EventSubWs,
	pub(crate) welcome: WelcomeMessage,
}

/// Open a socket to `reconnect_url` and wait for its welcome.
///
/// The socket is handed back unswapped; the session loop decides when to
/// take it over.
pub(crate) async fn perform_changeover(connector: WsConnector, reconnect_url: String) -> anyhow::Result<Changeover> {
	let url = Url::parse(&reconnect_url).with_context(|| format!("parse reconnect_url: {reconnect_url}"))?;

	let mut ws = (connector)(url).await.context("connect to reconnect_url")?;
	debug!(%reconnect_url, "replacement socket connected; waiting for session_welcome");

	let Some(text) = framing::read_text_message(&mut ws).await? else {
		anyhow::bail!("replacement socket closed before session_welcome");
	};

	match strom_protocol::parse_message(&text) {
		ParseOutcome::Message(ServerMessage::Welcome(welcome)) => Ok(Changeover {
			new_socket: ws,
			welcome,
		}),
		ParseOutcome::Message(other) => anyhow::bail!(
			"expected session_welcome as first message on replacement socket, got {}",
			other.metadata().message_type
		),
		other => anyhow::bail!("first message on replacement socket did not parse as a welcome: {other:?}"),
	}
}
