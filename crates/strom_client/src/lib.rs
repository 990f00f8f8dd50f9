#![forbid(unsafe_code)]

mod changeover;
mod clock;
mod events;
mod framing;
mod session;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{DisconnectReason, EventSink};
pub use session::{ClientConfig, DEFAULT_EVENTSUB_URL, EventSubClient};
pub use ttl::TtlSet;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The concrete socket type the session loop drives.
pub type EventSubWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Socket factory; injectable so tests can dial scripted local servers.
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<EventSubWs>> + Send + Sync>;
