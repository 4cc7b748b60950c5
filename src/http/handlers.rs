//! Device endpoint handlers (§6). Each takes the already-parsed request
//! parts and the [`super::Router`] capability set, and returns an
//! [`super::HttpResponse`] — never a Rust error; handler failures are
//! folded into a 5xx here per §7's propagation policy.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capability::{ClickAction, MouseButton, ScaleMode};

use super::xdo;
use super::{HttpResponse, Router};

const DEFAULT_SCREENSHOT_WIDTH: u32 = 1024;
const DEFAULT_SCREENSHOT_HEIGHT: u32 = 768;

/// 20 interpolation steps at ~5ms spacing for a "smooth" mouse move (§6).
const MOUSE_MOVE_STEPS: u32 = 20;
const MOUSE_MOVE_STEP_DELAY: Duration = Duration::from_millis(5);

pub async fn screenshot(router: &Router, query: &HashMap<String, String>) -> HttpResponse {
    let Some(screen) = &router.screen else {
        return HttpResponse::error(501, "screen capture capability not present");
    };

    let width = query
        .get("width")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SCREENSHOT_WIDTH);
    let height = query
        .get("height")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SCREENSHOT_HEIGHT);
    let mode = match query.get("mode").map(String::as_str) {
        Some("exact") => ScaleMode::Exact,
        Some("aspect_fill") => ScaleMode::AspectFill,
        Some("aspect_fit") | None => ScaleMode::AspectFit,
        Some(other) => return HttpResponse::error(400, &format!("unknown mode: {other}")),
    };

    match screen.screenshot(width, height, mode).await {
        Ok(png) => HttpResponse {
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "image/png".to_string())]),
            body: Bytes::from(png),
        },
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

pub async fn dimensions(router: &Router) -> HttpResponse {
    let Some(screen) = &router.screen else {
        return HttpResponse::error(501, "screen capture capability not present");
    };
    match screen.dimensions().await {
        Ok((width, height)) => HttpResponse::json(200, &serde_json::json!({"width": width, "height": height})),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

#[derive(Deserialize)]
struct TypeBody {
    text: String,
}

pub async fn keyboard_type(router: &Router, body: &[u8]) -> HttpResponse {
    let Some(input) = &router.input else {
        return HttpResponse::error(501, "input synthesis capability not present");
    };
    let parsed: TypeBody = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return HttpResponse::error(400, &format!("invalid body: {e}")),
    };

    let _device = router.device_lock.lock().await;
    match input.type_text(&parsed.text).await {
        Ok(()) => HttpResponse::empty(204),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

#[derive(Deserialize)]
struct KeyBody {
    sequence: String,
}

pub async fn keyboard_key(router: &Router, body: &[u8]) -> HttpResponse {
    let Some(input) = &router.input else {
        return HttpResponse::error(501, "input synthesis capability not present");
    };
    let parsed: KeyBody = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return HttpResponse::error(400, &format!("invalid body: {e}")),
    };

    let _device = router.device_lock.lock().await;
    match xdo::synthesize(input.as_ref(), &parsed.sequence).await {
        Ok(()) => HttpResponse::empty(204),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

pub async fn mouse_position(router: &Router) -> HttpResponse {
    let Some(input) = &router.input else {
        return HttpResponse::error(501, "input synthesis capability not present");
    };
    match input.mouse_position().await {
        Ok((x, y)) => HttpResponse::json(200, &serde_json::json!({"x": x, "y": y})),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

#[derive(Deserialize)]
struct MoveBody {
    x: i32,
    y: i32,
    #[serde(default = "default_true")]
    smooth: bool,
}

fn default_true() -> bool {
    true
}

pub async fn mouse_move(router: &Router, body: &[u8]) -> HttpResponse {
    let Some(input) = &router.input else {
        return HttpResponse::error(501, "input synthesis capability not present");
    };
    let parsed: MoveBody = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return HttpResponse::error(400, &format!("invalid body: {e}")),
    };

    let _device = router.device_lock.lock().await;

    if !parsed.smooth {
        return match input.mouse_move_to(parsed.x, parsed.y).await {
            Ok(()) => HttpResponse::empty(204),
            Err(e) => HttpResponse::error(500, &e.to_string()),
        };
    }

    let (start_x, start_y) = match input.mouse_position().await {
        Ok(pos) => pos,
        Err(e) => return HttpResponse::error(500, &e.to_string()),
    };

    for step in 1..=MOUSE_MOVE_STEPS {
        let t = step as f64 / MOUSE_MOVE_STEPS as f64;
        let ix = start_x + ((parsed.x - start_x) as f64 * t).round() as i32;
        let iy = start_y + ((parsed.y - start_y) as f64 * t).round() as i32;
        if let Err(e) = input.mouse_move_to(ix, iy).await {
            return HttpResponse::error(500, &e.to_string());
        }
        if step < MOUSE_MOVE_STEPS {
            tokio::time::sleep(MOUSE_MOVE_STEP_DELAY).await;
        }
    }

    HttpResponse::empty(204)
}

#[derive(Deserialize)]
struct ClickBody {
    button: MouseButton,
    #[serde(default)]
    action: ClickAction,
    x: Option<i32>,
    y: Option<i32>,
}

pub async fn mouse_click(router: &Router, body: &[u8]) -> HttpResponse {
    let Some(input) = &router.input else {
        return HttpResponse::error(501, "input synthesis capability not present");
    };
    let parsed: ClickBody = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return HttpResponse::error(400, &format!("invalid body: {e}")),
    };

    let _device = router.device_lock.lock().await;
    match input.mouse_button(parsed.button, parsed.action, parsed.x, parsed.y).await {
        Ok(()) => HttpResponse::empty(204),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

#[derive(Deserialize)]
struct ShellExecBody {
    command: String,
    #[serde(default = "default_shell_timeout")]
    timeout: f64,
}

fn default_shell_timeout() -> f64 {
    30.0
}

#[derive(Serialize)]
struct ShellExecResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

pub async fn shell_exec(router: &Router, body: &[u8]) -> HttpResponse {
    let Some(shell) = &router.shell else {
        return HttpResponse::error(501, "shell capability not present");
    };
    let parsed: ShellExecBody = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return HttpResponse::error(400, &format!("invalid body: {e}")),
    };

    match shell.exec(&parsed.command, parsed.timeout).await {
        Ok((exit_code, stdout, stderr)) => HttpResponse::json(
            200,
            &ShellExecResponse {
                exit_code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            },
        ),
        Err(e) => HttpResponse::error(500, &e.to_string()),
    }
}

/// Documented no-op for API compatibility (§6 Supplemental, §9 Open
/// Questions: whether to track an id is explicitly undecided, so it does not).
pub async fn shell_powershell_session() -> HttpResponse {
    HttpResponse::empty(204)
}

#[derive(Deserialize)]
struct UpdateBody {
    #[allow(dead_code)]
    version: String,
    #[allow(dead_code)]
    restart: bool,
}

/// Accepts the request; the staged-replace mechanics are out of scope (§1).
pub async fn internal_update(body: &[u8]) -> HttpResponse {
    match serde_json::from_slice::<UpdateBody>(body) {
        Ok(_) => HttpResponse::empty(202),
        Err(e) => HttpResponse::error(400, &format!("invalid body: {e}")),
    }
}
