//! Typed error kinds for the session runtime and supervisor.
//!
//! Handler failures (`HandlerError`), cancellation, and per-request timeouts
//! never reach these types — they are folded into HTTP responses inside the
//! dispatcher and never cross into `SessionError`.

/// Why a [`crate::session::Session`] ended. Consumed by the supervisor to
/// decide whether to reconnect, exit fatally, or just log and retry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport lost: {0}")]
    TransportLost(#[source] anyhow::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl SessionError {
    /// Fatal errors stop the process (exit code 3); everything else is
    /// expected and drives a reconnect with backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::HandshakeRejected(_))
    }
}
