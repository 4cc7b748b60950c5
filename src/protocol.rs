//! Tunnel codec (C2): encodes/decodes the framed messages carried over the
//! single agent↔cloud WebSocket, per §4.2.
//!
//! Wire shape, one frame per WebSocket message:
//! `kind: u8` (1 byte) + JSON header object + `\n` + raw body bytes.
//! Binary bodies (screenshots) ride as raw bytes, not base64, to dodge the
//! 33% overhead a text encoding would cost on the hot path.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Tagged variant carried over the WebSocket (§3 TunnelFrame).
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelFrame {
    Request {
        id: String,
        method: String,
        path: String,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: Bytes,
    },
    Response {
        id: String,
        status: u16,
        headers: HashMap<String, String>,
        body: Bytes,
    },
    Ping {
        nonce: i64,
    },
    Pong {
        nonce: i64,
    },
    Hello {
        fingerprint: String,
        version: String,
        capabilities: Vec<String>,
        keepalive_for: Option<String>,
    },
    Welcome {
        session_id: String,
        server_time: i64,
        /// Set when the cloud rejects a `keepalive_for` link (different org,
        /// or self-link); threaded through by C8.
        #[allow(dead_code)]
        rejected: Option<String>,
    },
    Bye {
        reason_code: String,
        message: String,
    },
}

/// Frame kind byte, per §4.2 (`kind ∈ {1..7}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Request = 1,
    Response = 2,
    Ping = 3,
    Pong = 4,
    Hello = 5,
    Welcome = 6,
    Bye = 7,
}

impl Kind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            5 => Some(Self::Hello),
            6 => Some(Self::Welcome),
            7 => Some(Self::Bye),
            _ => None,
        }
    }
}

/// Protocol errors (§7 `ProtocolError`): a malformed frame or oversize body.
/// Always fatal to the session — C6 closes with `Bye(protocol_error)`.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short: missing kind byte")]
    TooShort,
    #[error("unknown frame kind: {0}")]
    BadKind(u8),
    #[error("missing header/body separator")]
    MissingSeparator,
    #[error("malformed JSON header: {0}")]
    BadHeader(#[source] serde_json::Error),
    #[error("request/response frame missing id")]
    MissingId,
    #[error("body too large: {actual} bytes exceeds cap of {max} bytes")]
    BodyTooLarge { max: usize, actual: usize },
}

#[derive(Serialize, Deserialize)]
struct RequestHeader {
    id: String,
    method: String,
    path: String,
    #[serde(default)]
    query: HashMap<String, String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct ResponseHeader {
    id: String,
    status: u16,
    #[serde(default)]
    headers: HashMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct PingPongHeader {
    nonce: i64,
}

#[derive(Serialize, Deserialize)]
struct HelloHeader {
    fingerprint: String,
    version: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    keepalive_for: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WelcomeHeader {
    session_id: String,
    server_time: i64,
    #[serde(default)]
    rejected: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ByeHeader {
    reason_code: String,
    #[serde(default)]
    message: String,
}

impl TunnelFrame {
    /// Encode this frame into the wire shape described above.
    pub fn encode(&self) -> Bytes {
        let (kind, header_json, body): (Kind, Vec<u8>, &[u8]) = match self {
            TunnelFrame::Request {
                id,
                method,
                path,
                query,
                headers,
                body,
            } => (
                Kind::Request,
                serde_json::to_vec(&RequestHeader {
                    id: id.clone(),
                    method: method.clone(),
                    path: path.clone(),
                    query: query.clone(),
                    headers: headers.clone(),
                })
                .expect("RequestHeader serializes"),
                body.as_ref(),
            ),
            TunnelFrame::Response {
                id,
                status,
                headers,
                body,
            } => (
                Kind::Response,
                serde_json::to_vec(&ResponseHeader {
                    id: id.clone(),
                    status: *status,
                    headers: headers.clone(),
                })
                .expect("ResponseHeader serializes"),
                body.as_ref(),
            ),
            TunnelFrame::Ping { nonce } => (
                Kind::Ping,
                serde_json::to_vec(&PingPongHeader { nonce: *nonce }).expect("PingPongHeader serializes"),
                &[],
            ),
            TunnelFrame::Pong { nonce } => (
                Kind::Pong,
                serde_json::to_vec(&PingPongHeader { nonce: *nonce }).expect("PingPongHeader serializes"),
                &[],
            ),
            TunnelFrame::Hello {
                fingerprint,
                version,
                capabilities,
                keepalive_for,
            } => (
                Kind::Hello,
                serde_json::to_vec(&HelloHeader {
                    fingerprint: fingerprint.clone(),
                    version: version.clone(),
                    capabilities: capabilities.clone(),
                    keepalive_for: keepalive_for.clone(),
                })
                .expect("HelloHeader serializes"),
                &[],
            ),
            TunnelFrame::Welcome {
                session_id,
                server_time,
                rejected,
            } => (
                Kind::Welcome,
                serde_json::to_vec(&WelcomeHeader {
                    session_id: session_id.clone(),
                    server_time: *server_time,
                    rejected: rejected.clone(),
                })
                .expect("WelcomeHeader serializes"),
                &[],
            ),
            TunnelFrame::Bye {
                reason_code,
                message,
            } => (
                Kind::Bye,
                serde_json::to_vec(&ByeHeader {
                    reason_code: reason_code.clone(),
                    message: message.clone(),
                })
                .expect("ByeHeader serializes"),
                &[],
            ),
        };

        let mut buf = BytesMut::with_capacity(1 + header_json.len() + 1 + body.len());
        buf.put_u8(kind as u8);
        buf.put_slice(&header_json);
        buf.put_u8(b'\n');
        buf.put_slice(body);
        buf.freeze()
    }

    /// Decode a frame from raw WebSocket message bytes. `max_body_bytes` is
    /// the configurable cap from §9 Open Questions (default 64 MiB).
    pub fn decode(data: &[u8], max_body_bytes: usize) -> Result<Self, ProtocolError> {
        let kind_byte = *data.first().ok_or(ProtocolError::TooShort)?;
        let kind = Kind::from_u8(kind_byte).ok_or(ProtocolError::BadKind(kind_byte))?;
        let rest = &data[1..];
        let sep = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(ProtocolError::MissingSeparator)?;
        let header_bytes = &rest[..sep];
        let body = &rest[sep + 1..];

        if body.len() > max_body_bytes {
            return Err(ProtocolError::BodyTooLarge {
                max: max_body_bytes,
                actual: body.len(),
            });
        }

        let frame = match kind {
            Kind::Request => {
                let h: RequestHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                if h.id.is_empty() {
                    return Err(ProtocolError::MissingId);
                }
                TunnelFrame::Request {
                    id: h.id,
                    method: h.method,
                    path: h.path,
                    query: h.query,
                    headers: h.headers,
                    body: Bytes::copy_from_slice(body),
                }
            }
            Kind::Response => {
                let h: ResponseHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                if h.id.is_empty() {
                    return Err(ProtocolError::MissingId);
                }
                TunnelFrame::Response {
                    id: h.id,
                    status: h.status,
                    headers: h.headers,
                    body: Bytes::copy_from_slice(body),
                }
            }
            Kind::Ping => {
                let h: PingPongHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                TunnelFrame::Ping { nonce: h.nonce }
            }
            Kind::Pong => {
                let h: PingPongHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                TunnelFrame::Pong { nonce: h.nonce }
            }
            Kind::Hello => {
                let h: HelloHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                TunnelFrame::Hello {
                    fingerprint: h.fingerprint,
                    version: h.version,
                    capabilities: h.capabilities,
                    keepalive_for: h.keepalive_for,
                }
            }
            Kind::Welcome => {
                let h: WelcomeHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                TunnelFrame::Welcome {
                    session_id: h.session_id,
                    server_time: h.server_time,
                    rejected: h.rejected,
                }
            }
            Kind::Bye => {
                let h: ByeHeader =
                    serde_json::from_slice(header_bytes).map_err(ProtocolError::BadHeader)?;
                TunnelFrame::Bye {
                    reason_code: h.reason_code,
                    message: h.message,
                }
            }
        };

        Ok(frame)
    }

    /// The request/response id this frame carries, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            TunnelFrame::Request { id, .. } => Some(id),
            TunnelFrame::Response { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 64 << 20;

    #[test]
    fn request_round_trips() {
        let frame = TunnelFrame::Request {
            id: "r1".into(),
            method: "GET".into(),
            path: "/computer/display/dimensions".into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
        };
        let encoded = frame.encode();
        let decoded = TunnelFrame::decode(&encoded, CAP).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn response_with_binary_body_round_trips() {
        let body = Bytes::from_static(&[0x00, 0x01, 0xff, 0x89, b'P', b'N', b'G']);
        let frame = TunnelFrame::Response {
            id: "r2".into(),
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "image/png".to_string())]),
            body: body.clone(),
        };
        let encoded = frame.encode();
        let decoded = TunnelFrame::decode(&encoded, CAP).unwrap();
        assert_eq!(decoded, frame);
        match decoded {
            TunnelFrame::Response { body: b, .. } => assert_eq!(b, body),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ping_pong_round_trip() {
        let ping = TunnelFrame::Ping { nonce: 42 };
        let decoded = TunnelFrame::decode(&ping.encode(), CAP).unwrap();
        assert_eq!(decoded, ping);
    }

    #[test]
    fn bad_kind_byte_is_rejected() {
        let mut data = vec![9u8];
        data.extend_from_slice(b"{}\n");
        let err = TunnelFrame::decode(&data, CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::BadKind(9)));
    }

    #[test]
    fn missing_separator_is_rejected() {
        let data = vec![1u8, b'{', b'}'];
        let err = TunnelFrame::decode(&data, CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingSeparator));
    }

    #[test]
    fn request_without_id_is_rejected() {
        let mut data = vec![1u8];
        data.extend_from_slice(br#"{"id":"","method":"GET","path":"/x"}"#);
        data.push(b'\n');
        let err = TunnelFrame::decode(&data, CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingId));
    }

    #[test]
    fn oversize_body_is_rejected() {
        let frame = TunnelFrame::Response {
            id: "r3".into(),
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(vec![0u8; 128]),
        };
        let encoded = frame.encode();
        let err = TunnelFrame::decode(&encoded, 16).unwrap_err();
        assert!(matches!(err, ProtocolError::BodyTooLarge { max: 16, actual: 128 }));
    }

    #[test]
    fn malformed_json_header_is_rejected() {
        let mut data = vec![1u8];
        data.extend_from_slice(b"not json");
        data.push(b'\n');
        let err = TunnelFrame::decode(&data, CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::BadHeader(_)));
    }
}
