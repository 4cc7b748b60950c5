//! Dedicated WebSocket writer task (§4.6 Running/Writer). Sole owner of the
//! socket's send half; every outbound frame — dispatcher responses,
//! keepalive-gate-unrelated Pongs, Bye — funnels through its channel.
//!
//! Grounded directly on the teacher's `tunnel/writer.rs::spawn_writer`, with
//! one addition the teacher's version doesn't need: a `tokio::select!` arm
//! racing a 20s idle-ping interval (§4.6), since the teacher's own tunnel
//! keeps a separate heartbeat task for liveness instead of pinging from the
//! writer itself.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::protocol::TunnelFrame;

use super::heartbeat::WireClock;

pub type FrameSender = mpsc::Sender<TunnelFrame>;

/// Outbound queue depth (§3 `AppState`/§4.3 step 4: workers block on
/// backpressure rather than drop responses).
const OUTBOUND_QUEUE_DEPTH: usize = 64;

static PING_NONCE: AtomicI64 = AtomicI64::new(0);

/// `last_outbound_clock` is the Session's shared wire clock (§3 `Session`:
/// "mutable: ... last-outbound instant").
pub fn spawn_writer<S>(
    mut sink: S,
    ping_interval: Duration,
    last_outbound_clock: Arc<WireClock>,
) -> (FrameSender, JoinHandle<()>)
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<TunnelFrame>(OUTBOUND_QUEUE_DEPTH);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("writer channel closed, all senders dropped");
                        break;
                    };
                    if let Err(e) = write_frame(&mut sink, &frame).await {
                        error!(error = %e, "failed to write frame to WebSocket");
                        break;
                    }
                    last_outbound_clock.touch();
                }
                _ = tokio::time::sleep(ping_interval) => {
                    let nonce = PING_NONCE.fetch_add(1, Ordering::Relaxed);
                    let ping = TunnelFrame::Ping { nonce };
                    if let Err(e) = write_frame(&mut sink, &ping).await {
                        error!(error = %e, "failed to write idle ping");
                        break;
                    }
                    last_outbound_clock.touch();
                }
            }
        }
        debug!("writer task exiting");
        let _ = sink.close().await;
    });

    (tx, handle)
}

async fn write_frame<S>(sink: &mut S, frame: &TunnelFrame) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let data = frame.encode();
    sink.send(Message::Binary(data.into())).await
}
