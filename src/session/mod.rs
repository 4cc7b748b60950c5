//! Session runtime (C6, §4.6): one end-to-end WebSocket conversation with
//! the cloud, `Dialing → Handshaking → Running → Draining → Closed`. A
//! [`Session`] is one-shot — it never retries itself; the supervisor (C7)
//! owns the reconnect loop around it.
//!
//! Grounded on the teacher's `tunnel/client.rs::connect_and_run` for the
//! dial/handshake/run/cleanup shape, TCP tuning (`configure_tcp_socket`) and
//! `WebSocketConfig` max-frame-size pattern; generalized from the teacher's
//! header-based `Authorization`/`X-Node-Id` auth to this crate's single
//! bearer-token `Authorization` header (§4.6 implementation note: header-
//! based secret, chosen over a query-string secret and applied consistently).

mod heartbeat;
mod reader;
mod writer;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityClock;
use crate::config::TlsTrust;
use crate::dispatcher::Dispatcher;
use crate::errors::SessionError;
use crate::gate::KeepaliveGate;
use crate::http::Router;
use crate::protocol::TunnelFrame;

use heartbeat::WireClock;

/// Dial + handshake budget (§4.6 Dialing/Handshaking).
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Writer emits an idle Ping if nothing else has gone out for this long.
const PING_INTERVAL: Duration = Duration::from_secs(20);
/// Draining waits this long for in-flight responses to flush before close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SessionConfig {
    pub host: String,
    pub secret: String,
    pub fingerprint: String,
    pub version: String,
    pub keepalive_for: Option<String>,
    pub tls_trust: TlsTrust,
    pub ca_file: Option<std::path::PathBuf>,
    pub max_frame_bytes: usize,
}

/// What ended a [`Session::run`] call that did not return an error.
pub enum SessionOutcome {
    /// The caller's `shutdown` token fired; not a reconnect-worthy close.
    Cancelled,
    /// The tunnel closed for a normal/expected reason (Bye, stale socket,
    /// peer hangup, protocol fault) — the supervisor should reconnect.
    Disconnected,
}

/// Run one Session to completion. Never retries; the supervisor loops this.
pub async fn run(
    config: &SessionConfig,
    router: Arc<Router>,
    gate: Arc<KeepaliveGate>,
    activity: Arc<ActivityClock>,
    shutdown: CancellationToken,
) -> Result<SessionOutcome, SessionError> {
    let tls_config = crate::tls::build_client_config(config.tls_trust, config.ca_file.as_deref())
        .map_err(SessionError::TransportLost)?;

    let (ws_stream, _response) = tokio::select! {
        result = dial(config, &tls_config) => result?,
        _ = shutdown.cancelled() => return Ok(SessionOutcome::Cancelled),
    };

    let (mut ws_sink, mut ws_read) = ws_stream.split();

    let session_id = tokio::select! {
        result = handshake(config, &router, &mut ws_sink, &mut ws_read) => result?,
        _ = shutdown.cancelled() => return Ok(SessionOutcome::Cancelled),
    };
    info!(session_id = %session_id, "tunnel session established");

    let last_inbound = Arc::new(WireClock::new());
    let last_outbound = Arc::new(WireClock::new());

    let (frame_tx, writer_handle) = writer::spawn_writer(ws_sink, PING_INTERVAL, Arc::clone(&last_outbound));
    let dispatcher = Dispatcher::new(router, gate, activity, frame_tx.clone());

    let reader_dispatcher = Arc::clone(&dispatcher);
    let reader_frame_tx = frame_tx.clone();
    let max_frame_bytes = config.max_frame_bytes;
    let reader_last_inbound = Arc::clone(&last_inbound);
    let mut reader_task = tokio::spawn(async move {
        reader::run(ws_read, reader_dispatcher, reader_frame_tx, max_frame_bytes, reader_last_inbound).await
    });

    let reader_exit = tokio::select! {
        result = &mut reader_task => match result {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "reader task panicked");
                reader::ReaderExit::ConnectionClosed
            }
        },
        _ = shutdown.cancelled() => {
            dispatcher.cancel_all();
            drop(frame_tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), writer_handle).await;
            return Ok(SessionOutcome::Cancelled);
        }
    };

    let outcome = match reader_exit {
        reader::ReaderExit::Bye { reason_code, message } => {
            info!(reason_code = %reason_code, message = ?message, "peer said goodbye, draining");
            dispatcher.start_draining();
            dispatcher.wait_drain(DRAIN_TIMEOUT).await;
            Ok(SessionOutcome::Disconnected)
        }
        reader::ReaderExit::Stale => {
            warn!("tunnel socket stale, closing");
            Ok(SessionOutcome::Disconnected)
        }
        reader::ReaderExit::ConnectionClosed => {
            debug!("tunnel connection closed");
            Ok(SessionOutcome::Disconnected)
        }
        reader::ReaderExit::ProtocolFault(e) => {
            warn!(error = %e, "protocol fault, sending Bye and closing");
            let _ = frame_tx
                .send(TunnelFrame::Bye {
                    reason_code: "protocol_error".to_string(),
                    message: e.to_string(),
                })
                .await;
            Err(SessionError::Protocol(e))
        }
    };

    dispatcher.cancel_all();
    drop(frame_tx);
    if !writer_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), writer_handle).await;
    }

    outcome
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn dial(
    config: &SessionConfig,
    tls_config: &Arc<rustls::ClientConfig>,
) -> Result<(WsStream, http::Response<Option<Vec<u8>>>), SessionError> {
    let ws_url = build_tunnel_url(&config.host);
    info!(url = %ws_url, "dialing tunnel");

    let mut request = ws_url
        .clone()
        .into_client_request()
        .map_err(|e| SessionError::TransportLost(e.into()))?;
    request.headers_mut().insert(
        "Authorization",
        http::HeaderValue::from_str(&format!("Bearer {}", config.secret))
            .map_err(|e| SessionError::TransportLost(e.into()))?,
    );

    let parsed = url::Url::parse(&ws_url).map_err(|e| SessionError::TransportLost(e.into()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SessionError::TransportLost(anyhow::anyhow!("missing host in tunnel URL")))?
        .to_string();
    let is_tls = parsed.scheme() == "wss";
    let port = parsed.port().unwrap_or(if is_tls { 443 } else { 80 });

    let tcp_stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| SessionError::TransportLost(anyhow::anyhow!("tunnel TCP connect timeout")))?
        .map_err(|e| SessionError::TransportLost(e.into()))?;

    configure_tcp_socket(&tcp_stream);

    let connector = if is_tls {
        Some(tokio_tungstenite::Connector::Rustls(Arc::clone(tls_config)))
    } else {
        None
    };

    let ws_config = WebSocketConfig {
        max_frame_size: Some(config.max_frame_bytes),
        max_message_size: Some(config.max_frame_bytes),
        ..Default::default()
    };

    tokio::time::timeout(
        DIAL_TIMEOUT,
        tokio_tungstenite::client_async_tls_with_config(request, tcp_stream, Some(ws_config), connector),
    )
    .await
    .map_err(|_| SessionError::TransportLost(anyhow::anyhow!("tunnel WebSocket handshake timeout")))?
    .map_err(|e| SessionError::TransportLost(e.into()))
}

/// Send Hello and await Welcome within the handshake budget (§4.6
/// Handshaking). Any other frame, or a timeout, is a `TransportLost` —
/// a rejection (wrong secret, org mismatch, self-link) is the only case
/// that escalates to the fatal `HandshakeRejected`.
async fn handshake<Sink, Stream>(config: &SessionConfig, router: &Router, ws_sink: &mut Sink, ws_read: &mut Stream) -> Result<String, SessionError>
where
    Sink: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    Stream: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    use futures_util::SinkExt;

    let hello = TunnelFrame::Hello {
        fingerprint: config.fingerprint.clone(),
        version: config.version.clone(),
        capabilities: router.capabilities(),
        keepalive_for: config.keepalive_for.clone(),
    };
    ws_sink
        .send(Message::Binary(hello.encode().into()))
        .await
        .map_err(|e| SessionError::TransportLost(e.into()))?;

    let msg = tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_read.next())
        .await
        .map_err(|_| SessionError::TransportLost(anyhow::anyhow!("handshake timed out waiting for Welcome")))?
        .ok_or_else(|| SessionError::TransportLost(anyhow::anyhow!("connection closed during handshake")))?
        .map_err(|e| SessionError::TransportLost(e.into()))?;

    let data = match msg {
        Message::Binary(data) => data,
        other => {
            return Err(SessionError::TransportLost(anyhow::anyhow!(
                "expected a binary Welcome frame, got {other:?}"
            )))
        }
    };

    let frame = TunnelFrame::decode(&data, config.max_frame_bytes)?;
    match frame {
        TunnelFrame::Welcome { rejected: Some(reason), .. } => Err(SessionError::HandshakeRejected(reason)),
        TunnelFrame::Welcome { session_id, rejected: None, .. } => Ok(session_id),
        other => Err(SessionError::TransportLost(anyhow::anyhow!("expected Welcome, got {other:?}"))),
    }
}

fn configure_tcp_socket(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30)).with_interval(Duration::from_secs(5));
    #[cfg(not(target_os = "windows"))]
    let keepalive = keepalive.with_retries(3);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "failed to set TCP keepalive on tunnel socket");
    }
    if let Err(e) = sock_ref.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY on tunnel socket");
    }
}

fn build_tunnel_url(host: &str) -> String {
    let base = host.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/agent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tunnel_url_upgrades_https_to_wss() {
        assert_eq!(build_tunnel_url("https://api.cyberdesk.io"), "wss://api.cyberdesk.io/agent");
    }

    #[test]
    fn build_tunnel_url_upgrades_http_to_ws() {
        assert_eq!(build_tunnel_url("http://localhost:8080"), "ws://localhost:8080/agent");
    }

    #[test]
    fn build_tunnel_url_defaults_bare_host_to_wss() {
        assert_eq!(build_tunnel_url("api.cyberdesk.io"), "wss://api.cyberdesk.io/agent");
    }

    #[test]
    fn build_tunnel_url_trims_trailing_slash() {
        assert_eq!(build_tunnel_url("https://api.cyberdesk.io/"), "wss://api.cyberdesk.io/agent");
    }
}
