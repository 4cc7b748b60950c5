//! Reader half of the Running state (§4.6): decodes inbound frames and
//! routes them, tracking wire-level liveness to detect a dead socket.
//! Grounded on the teacher's `tunnel/dispatcher.rs::run` — the same
//! `sleep_until(last_data_at + stale_timeout)` idiom that detects a silent
//! peer there detects one here, generalized from the teacher's fixed
//! 10-byte frame decode to this crate's JSON-header `TunnelFrame` decode.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::protocol::{ProtocolError, TunnelFrame};

use super::heartbeat::WireClock;
use super::writer::FrameSender;

/// No inbound frame for this long means the socket is dead (§4.6 Writer).
pub const DEAD_TIMEOUT: Duration = Duration::from_secs(45);

pub enum ReaderExit {
    Bye { reason_code: String, message: String },
    ConnectionClosed,
    Stale,
    ProtocolFault(ProtocolError),
}

/// `last_inbound` is the Session's shared wire clock (§3 `Session`:
/// "mutable: ... last-inbound instant"), so the supervisor/Session object
/// can report liveness without reaching into this task's local state.
pub async fn run<S>(
    mut ws_read: S,
    dispatcher: Arc<Dispatcher>,
    frame_tx: FrameSender,
    max_frame_bytes: usize,
    last_inbound_clock: Arc<WireClock>,
) -> ReaderExit
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin + Send + 'static,
{
    let mut last_inbound = Instant::now();
    last_inbound_clock.touch();

    loop {
        let msg = tokio::select! {
            msg = ws_read.next() => match msg {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read error");
                    return ReaderExit::ConnectionClosed;
                }
                None => return ReaderExit::ConnectionClosed,
            },
            _ = tokio::time::sleep_until(last_inbound + DEAD_TIMEOUT) => {
                warn!(secs = DEAD_TIMEOUT.as_secs(), "tunnel connection stale, no inbound frame");
                return ReaderExit::Stale;
            }
        };

        last_inbound = Instant::now();
        last_inbound_clock.touch();

        let data = match msg {
            Message::Binary(data) => data,
            Message::Close(_) => {
                debug!("received websocket close");
                return ReaderExit::ConnectionClosed;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => continue,
        };

        let frame = match TunnelFrame::decode(&data, max_frame_bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to decode tunnel frame");
                return ReaderExit::ProtocolFault(e);
            }
        };

        match frame {
            TunnelFrame::Request { id, method, path, query, headers, body } => {
                dispatcher.dispatch(id, method, path, query, headers, body);
            }
            TunnelFrame::Ping { nonce } => {
                if frame_tx.send(TunnelFrame::Pong { nonce }).await.is_err() {
                    return ReaderExit::ConnectionClosed;
                }
            }
            TunnelFrame::Pong { .. } => {
                // `last_inbound` was already refreshed above.
            }
            TunnelFrame::Bye { reason_code, message } => {
                return ReaderExit::Bye { reason_code, message };
            }
            TunnelFrame::Response { .. } | TunnelFrame::Hello { .. } | TunnelFrame::Welcome { .. } => {
                debug!("ignoring frame kind not expected from the server during Running");
            }
        }
    }
}
