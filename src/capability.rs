//! Device capability traits consumed by the local HTTP surface (C1) and by
//! the keepalive worker (C5). The concrete screen-capture, input-synthesis,
//! and shell-execution backends are out of scope for this crate (§1); what
//! lives here is the contract they must satisfy, plus a stub implementation
//! that answers truthfully with "not implemented" so the binary still runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How a requested screenshot size relates to the real display size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Exact,
    AspectFit,
    AspectFill,
}

impl Default for ScaleMode {
    fn default() -> Self {
        ScaleMode::AspectFit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickAction {
    Click,
    Down,
    Up,
}

impl Default for ClickAction {
    fn default() -> Self {
        ClickAction::Click
    }
}

/// Screen capture and display geometry (§6 `/computer/display/*`).
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn dimensions(&self) -> anyhow::Result<(u32, u32)>;

    /// Returns a PNG-encoded image sized per `mode`.
    async fn screenshot(&self, width: u32, height: u32, mode: ScaleMode) -> anyhow::Result<Vec<u8>>;
}

/// Raw keyboard and mouse primitives (§6 `/computer/input/*`). Deliberately
/// low-level: the XDO chord grammar (§6, §8.6) and mouse-move interpolation
/// (§6 "smooth") are in-scope C1 behavior and are implemented once in
/// `http::handlers` on top of these primitives, not duplicated per backend.
#[async_trait]
pub trait InputSynthesis: Send + Sync {
    async fn mouse_position(&self) -> anyhow::Result<(i32, i32)>;

    async fn mouse_move_to(&self, x: i32, y: i32) -> anyhow::Result<()>;

    async fn mouse_button(
        &self,
        button: MouseButton,
        action: ClickAction,
        x: Option<i32>,
        y: Option<i32>,
    ) -> anyhow::Result<()>;

    /// Press a single chord token down (`"ctrl"`, `"a"`, `"f5"`, ...).
    async fn key_down(&self, token: &str) -> anyhow::Result<()>;

    /// Release a single chord token.
    async fn key_up(&self, token: &str) -> anyhow::Result<()>;

    async fn type_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Arbitrary shell execution (§6 `/computer/shell/*`). Absent by default;
/// the router answers 501 when no capability is registered.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn exec(&self, command: &str, timeout_secs: f64) -> anyhow::Result<(i32, Vec<u8>, Vec<u8>)>;
}

/// Arbitrary file access (`/computer/file/*`). Same "absent by default" deal
/// as [`ShellExecutor`].
#[async_trait]
pub trait FileAccess: Send + Sync {
    async fn read(&self, path: &str) -> anyhow::Result<Vec<u8>>;
    async fn write(&self, path: &str, data: &[u8]) -> anyhow::Result<()>;
}

/// Stub screen/input capability: truthfully reports it cannot do the thing.
/// Used so `cyberdriver start`/`join` link and run without a real backend
/// wired in; a platform-specific crate would replace this.
pub struct UnimplementedCapability;

#[async_trait]
impl ScreenCapture for UnimplementedCapability {
    async fn dimensions(&self) -> anyhow::Result<(u32, u32)> {
        anyhow::bail!("screen capture backend not wired in")
    }

    async fn screenshot(&self, _w: u32, _h: u32, _mode: ScaleMode) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("screen capture backend not wired in")
    }
}

#[async_trait]
impl InputSynthesis for UnimplementedCapability {
    async fn mouse_position(&self) -> anyhow::Result<(i32, i32)> {
        anyhow::bail!("input synthesis backend not wired in")
    }

    async fn mouse_move_to(&self, _x: i32, _y: i32) -> anyhow::Result<()> {
        anyhow::bail!("input synthesis backend not wired in")
    }

    async fn mouse_button(
        &self,
        _button: MouseButton,
        _action: ClickAction,
        _x: Option<i32>,
        _y: Option<i32>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("input synthesis backend not wired in")
    }

    async fn key_down(&self, _token: &str) -> anyhow::Result<()> {
        anyhow::bail!("input synthesis backend not wired in")
    }

    async fn key_up(&self, _token: &str) -> anyhow::Result<()> {
        anyhow::bail!("input synthesis backend not wired in")
    }

    async fn type_text(&self, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("input synthesis backend not wired in")
    }
}
