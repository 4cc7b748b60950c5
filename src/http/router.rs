//! Route table and capability-gated dispatch for the local HTTP surface
//! (C1, §4.1). `Router::invoke` is the in-process primitive both the real
//! hyper server (`http::server::run`) and the tunnel-side dispatcher (C3)
//! call — a local curl and a cloud-originated request go through the exact
//! same path from here on, per §4.1's "indistinguishable" requirement.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use serde::Serialize;

use crate::capability::{FileAccess, InputSynthesis, ScreenCapture, ShellExecutor};

use super::handlers;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
                body: Bytes::from(body),
            },
            Err(e) => Self::error(500, &format!("failed to encode response: {e}")),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({"error": message}))
    }

    pub fn not_found() -> Self {
        Self::error(404, "no such route")
    }
}

/// Capability-holding route table. Each field is `None` when this process
/// was started without a backend for that device class (§1 Non-goals); the
/// router answers 501 for the corresponding paths rather than panicking.
#[derive(Default)]
pub struct Router {
    pub screen: Option<Arc<dyn ScreenCapture>>,
    pub input: Option<Arc<dyn InputSynthesis>>,
    pub shell: Option<Arc<dyn ShellExecutor>>,
    pub file: Option<Arc<dyn FileAccess>>,
    /// Serializes input-device endpoints so two concurrent keyboard/mouse
    /// requests never interleave their events (§5, independent of the
    /// keepalive gate, which only arbitrates keepalive-vs-request).
    pub(crate) device_lock: tokio::sync::Mutex<()>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen(mut self, screen: Arc<dyn ScreenCapture>) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputSynthesis>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_shell(mut self, shell: Arc<dyn ShellExecutor>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_file(mut self, file: Arc<dyn FileAccess>) -> Self {
        self.file = Some(file);
        self
    }

    /// The capability tokens advertised in the Hello frame (§3 `Config`,
    /// §6 handshake). Purely descriptive — the tunnel side does not gate on
    /// these, the router itself does per-call.
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps = Vec::new();
        if self.screen.is_some() {
            caps.push("screen".to_string());
        }
        if self.input.is_some() {
            caps.push("input".to_string());
        }
        if self.shell.is_some() {
            caps.push("shell".to_string());
        }
        if self.file.is_some() {
            caps.push("file".to_string());
        }
        caps
    }

    /// Route and execute one request. Never returns an `Err`: a handler
    /// panic is caught and folded into a 500 (§7 "a handler panic must not
    /// bring down the session or the process"). `headers` is accepted to
    /// match the `invoke(method, path, query, headers, body)` contract (§4.1)
    /// shared with C3; no handler in this crate currently inspects it.
    pub async fn invoke(
        &self,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
        _headers: &HashMap<String, String>,
        body: &[u8],
    ) -> HttpResponse {
        let outcome = AssertUnwindSafe(self.dispatch(method, path, query, body))
            .catch_unwind()
            .await;

        match outcome {
            Ok(response) => response,
            Err(_) => HttpResponse::error(500, "handler panicked"),
        }
    }

    async fn dispatch(
        &self,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
        body: &[u8],
    ) -> HttpResponse {
        match (method, path) {
            ("GET", "/computer/display/screenshot") => handlers::screenshot(self, query).await,
            ("GET", "/computer/display/dimensions") => handlers::dimensions(self).await,
            ("POST", "/computer/input/keyboard/type") => handlers::keyboard_type(self, body).await,
            ("POST", "/computer/input/keyboard/key") => handlers::keyboard_key(self, body).await,
            ("GET", "/computer/input/mouse/position") => handlers::mouse_position(self).await,
            ("POST", "/computer/input/mouse/move") => handlers::mouse_move(self, body).await,
            ("POST", "/computer/input/mouse/click") => handlers::mouse_click(self, body).await,
            ("POST", "/computer/shell/powershell/exec") => handlers::shell_exec(self, body).await,
            ("POST", "/computer/shell/powershell/session") => handlers::shell_powershell_session().await,
            ("POST", "/internal/update") => handlers::internal_update(body).await,
            (_, p) if p.starts_with("/computer/shell/") => {
                HttpResponse::error(501, "shell capability not present")
            }
            (_, p) if p.starts_with("/computer/file/") => {
                HttpResponse::error(501, "file capability not present")
            }
            _ => HttpResponse::not_found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::UnimplementedCapability;

    #[tokio::test]
    async fn unknown_path_is_404() {
        let router = Router::new();
        let resp = router.invoke("GET", "/nope", &HashMap::new(), &HashMap::new(), &[]).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn screenshot_without_capability_is_501() {
        let router = Router::new();
        let resp = router
            .invoke("GET", "/computer/display/screenshot", &HashMap::new(), &HashMap::new(), &[])
            .await;
        assert_eq!(resp.status, 501);
    }

    #[tokio::test]
    async fn screenshot_with_stub_capability_surfaces_its_error_as_500() {
        let router = Router::new().with_screen(Arc::new(UnimplementedCapability));
        let resp = router
            .invoke("GET", "/computer/display/screenshot", &HashMap::new(), &HashMap::new(), &[])
            .await;
        assert_eq!(resp.status, 500);
    }

    #[tokio::test]
    async fn powershell_session_is_always_a_no_op_204() {
        let router = Router::new();
        let resp = router
            .invoke("POST", "/computer/shell/powershell/session", &HashMap::new(), &HashMap::new(), &[])
            .await;
        assert_eq!(resp.status, 204);
    }

    #[tokio::test]
    async fn capabilities_lists_only_registered_backends() {
        let router = Router::new().with_screen(Arc::new(UnimplementedCapability));
        assert_eq!(router.capabilities(), vec!["screen".to_string()]);
    }
}
