#![forbid(unsafe_code)]

use anyhow::bail;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, warn};

/// Close frame carrying an explicit normal-closure status and empty reason.
pub(crate) fn normal_closure() -> CloseFrame {
	CloseFrame {
		code: CloseCode::Normal,
		reason: Default::default(),
	}
}

/// Read the next complete text message from the socket.
///
/// Pings are answered in place. `None` means the peer is gone: either it sent
/// a close frame (answered with a normal closure before returning) or the
/// transport dropped. A binary or raw frame is a protocol error.
pub(crate) async fn read_text_message<S>(ws: &mut WebSocketStream<S>) -> anyhow::Result<Option<String>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	loop {
		let Some(frame) = ws.next().await else {
			return Ok(None);
		};

		let frame = match frame {
			Ok(f) => f,
			Err(e) => {
				warn!(error = %e, "eventsub ws read error");
				return Ok(None);
			}
		};

		match frame {
			Message::Text(text) => {
				// The transport must never hand a BOM to the parser.
				let text = text.as_str();
				let text = text.strip_prefix('\u{feff}').unwrap_or(text);
				return Ok(Some(text.to_string()));
			}

			Message::Ping(payload) => {
				let _ = ws.send(Message::Pong(payload)).await;
			}

			Message::Pong(_) => {}

			Message::Close(frame) => {
				debug!(frame = ?frame, "eventsub ws closed by peer");
				let _ = ws.close(Some(normal_closure())).await;
				return Ok(None);
			}

			Message::Binary(_) | Message::Frame(_) => {
				bail!("unexpected non-text frame on eventsub socket");
			}
		}
	}
}
