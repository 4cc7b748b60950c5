//! The loopback-bound hyper server (§4.1). Grounded on the teacher's
//! `proxy/server.rs` accept loop and `service_fn` wiring, minus the TLS
//! dual-stack detection and connection-limiting semaphore — this surface is
//! local-only and unauthenticated by design (§4.1: "does not know whether a
//! caller is local or remote").

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Router;

pub async fn run(router: Arc<Router>, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "local http surface listening");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let router = Arc::clone(&router);
                tokio::task::spawn(async move {
                    serve_connection(stream, peer_addr, router).await;
                });
            }
            _ = shutdown.cancelled() => {
                info!("local http surface shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn serve_connection(stream: tokio::net::TcpStream, peer_addr: SocketAddr, router: Arc<Router>) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(handle(&router, req).await) }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        if !e.to_string().contains("connection closed") {
            debug!(peer = %peer_addr, error = %e, "connection error");
        }
    }
}

async fn handle(router: &Router, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query().unwrap_or(""));
    let headers = req
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect::<HashMap<_, _>>();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return json_response(400, format!(r#"{{"error":"failed to read body: {e}"}}"#));
        }
    };

    let response = router.invoke(&method, &path, &query, &headers, &body).await;

    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    builder.body(Full::new(response.body)).unwrap_or_else(|_| {
        Response::builder()
            .status(500)
            .body(Full::new(Bytes::from_static(b"{\"error\":\"failed to build response\"}")))
            .unwrap()
    })
}

fn json_response(status: u16, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_decodes_pairs() {
        let query = parse_query("width=200&mode=aspect_fit");
        assert_eq!(query.get("width").map(String::as_str), Some("200"));
        assert_eq!(query.get("mode").map(String::as_str), Some("aspect_fit"));
    }

    #[test]
    fn parse_query_handles_percent_encoding() {
        let query = parse_query("path=%2Ftmp%2Ffile");
        assert_eq!(query.get("path").map(String::as_str), Some("/tmp/file"));
    }

    #[test]
    fn parse_query_empty_string_is_empty_map() {
        assert!(parse_query("").is_empty());
    }
}
