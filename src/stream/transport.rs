// =============================================================================
// Streaming transport — one physical duplex connection behind channels
// =============================================================================
//
// The multiplexer never touches a socket. A `Connector` hands it a
// `Connection`: an outgoing frame sender and an inbound message receiver
// wired to one physical WebSocket. When the socket dies the inbound channel
// closes, which is the multiplexer's signal to reconnect. Tests implement
// `Connector` over plain channels.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::protocol::{parse_inbound, InboundMessage, OutgoingMessage};

/// One established duplex connection, mapped to protocol types.
///
/// Dropping `outgoing` ends the write pump; the `inbound` receiver yields
/// `None` once the physical connection is gone.
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<OutgoingMessage>,
    pub inbound: mpsc::UnboundedReceiver<InboundMessage>,
}

/// Opens physical connections on demand. The multiplexer owns exactly one
/// live [`Connection`] at a time and is the only caller.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'static, Result<Connection>>;
}

// =============================================================================
// WebSocket connector
// =============================================================================

/// [`Connector`] over tokio-tungstenite.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// `ws_url` is the bare endpoint; the API token travels as a query
    /// parameter, which is how the upstream authenticates stream clients.
    pub fn new(ws_url: &str, token: &str) -> Self {
        Self {
            url: format!("{ws_url}?token={token}"),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Connection>> {
        let url = self.url.clone();

        async move {
            let (ws_stream, _response) = connect_async(&url)
                .await
                .context("failed to connect to trade WebSocket")?;

            info!("trade WebSocket connected");
            let (mut write, mut read) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutgoingMessage>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<InboundMessage>();

            // Write pump: outgoing frames -> socket.
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    debug!(frame = ?frame, "sending upstream frame");
                    if let Err(e) = write.send(Message::Text(frame.to_json())).await {
                        warn!(error = %e, "WebSocket send failed — write pump ending");
                        break;
                    }
                }
            });

            // Read pump: socket -> classified inbound messages.
            tokio::spawn(async move {
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => match parse_inbound(&text) {
                            Ok(msg) => {
                                if in_tx.send(msg).is_err() {
                                    // Receiver gone; the connection was replaced.
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "dropping malformed inbound frame");
                            }
                        },
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket Close frame received");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping/Pong/Binary — tungstenite answers pings
                            // automatically; nothing to do.
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            break;
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            break;
                        }
                    }
                }
                // `in_tx` drops here; the multiplexer sees end-of-stream and
                // schedules a reconnect.
            });

            Ok(Connection {
                outgoing: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}
