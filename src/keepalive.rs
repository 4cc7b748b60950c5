//! Keepalive worker (C5, §4.5): an idle-driven loop that synthesizes a
//! short burst of user activity — a move-and-click, a few filler phrases,
//! an Escape — to keep a remote desktop session from looking abandoned.
//!
//! Grounded on the teacher's `tunnel/heartbeat.rs` spawn-a-background-task-
//! with-`select!` shape; the keepalive *action* itself has no teacher
//! counterpart (the teacher's heartbeat sends metrics, not input) and is
//! built against the `other_examples` cyberdriver reference's
//! `KeepAliveManager` concept (`wait_until_idle`/`record_activity`),
//! reimplemented here against this crate's own `ActivityClock`/gate.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::activity::ActivityClock;
use crate::capability::{InputSynthesis, MouseButton, ScreenCapture};
use crate::gate::KeepaliveGate;

/// Filler phrases typed during a keepalive action. Short and innocuous —
/// none of this is meant to be legible, just to register as keystrokes.
const FILLER_PHRASES: &[&str] = &["ok", "hm", "checking", "one sec", "looking", "alright", "noted"];

const MIN_PHRASES: usize = 2;
const MAX_PHRASES: usize = 5;
const MIN_KEYSTROKE_DELAY_MS: u64 = 80;
const MAX_KEYSTROKE_DELAY_MS: u64 = 250;

/// Fallback click point when no explicit coordinates are configured: the
/// bottom-left of the primary screen, inset 10px from each edge (§4.5).
const EDGE_INSET: i32 = 10;

pub struct KeepaliveConfig {
    pub threshold: Duration,
    pub click_x: Option<i32>,
    pub click_y: Option<i32>,
}

/// Run the keepalive loop until `pause` reports the supervisor has paused
/// it (Disabled, §4.7) or the process is shutting down. `pause` true means
/// paused; the loop parks on the gate's idle condition otherwise.
pub async fn run(
    config: KeepaliveConfig,
    activity: Arc<ActivityClock>,
    gate: Arc<KeepaliveGate>,
    screen: Arc<dyn ScreenCapture>,
    input: Arc<dyn InputSynthesis>,
    mut pause: watch::Receiver<bool>,
) {
    loop {
        if *pause.borrow() {
            if pause.changed().await.is_err() {
                return;
            }
            continue;
        }

        let idle = activity.idle_for();
        if idle < config.threshold {
            let remaining = config.threshold - idle;
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                result = pause.changed() => {
                    if result.is_err() {
                        return;
                    }
                    continue;
                }
            }
            continue;
        }

        let guard = tokio::select! {
            guard = gate.acquire_exclusive() => guard,
            result = pause.changed() => {
                if result.is_err() {
                    return;
                }
                continue;
            }
        };

        if let Err(e) = perform_action(&config, screen.as_ref(), input.as_ref()).await {
            warn!(error = %e, "keepalive action failed");
        } else {
            debug!("keepalive action completed");
        }

        drop(guard);
        activity.touch_with_jitter();
    }
}

async fn perform_action(
    config: &KeepaliveConfig,
    screen: &dyn ScreenCapture,
    input: &dyn InputSynthesis,
) -> anyhow::Result<()> {
    let (x, y) = match (config.click_x, config.click_y) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            let (width, height) = screen.dimensions().await?;
            (EDGE_INSET, height as i32 - EDGE_INSET)
        }
    };

    // §4.5: coordinates, once resolved, are never clamped — a misbehaving
    // virtual display is the caller's problem to configure around.
    input.mouse_move_to(x, y).await?;
    input.mouse_button(MouseButton::Left, crate::capability::ClickAction::Click, Some(x), Some(y)).await?;

    let phrase_count = rand::thread_rng().gen_range(MIN_PHRASES..=MAX_PHRASES);
    for _ in 0..phrase_count {
        let phrase = FILLER_PHRASES.choose(&mut rand::thread_rng()).copied().unwrap_or("ok");
        type_with_jitter(input, phrase).await?;
    }

    input.key_down("esc").await?;
    input.key_up("esc").await?;

    Ok(())
}

/// Type `text` one character at a time with a random 80-250ms gap between
/// keystrokes (§4.5), rather than calling `type_text` in one shot — the
/// inter-keystroke timing is the point, not the throughput.
async fn type_with_jitter(input: &dyn InputSynthesis, text: &str) -> anyhow::Result<()> {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        input.type_text(&c.to_string()).await?;
        if chars.peek().is_some() {
            let delay_ms = rand::thread_rng().gen_range(MIN_KEYSTROKE_DELAY_MS..=MAX_KEYSTROKE_DELAY_MS);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ClickAction, UnimplementedCapability};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingInput {
        events: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl InputSynthesis for RecordingInput {
        async fn mouse_position(&self) -> anyhow::Result<(i32, i32)> {
            Ok((0, 0))
        }
        async fn mouse_move_to(&self, x: i32, y: i32) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("move:{x},{y}"));
            Ok(())
        }
        async fn mouse_button(
            &self,
            _button: MouseButton,
            _action: ClickAction,
            x: Option<i32>,
            y: Option<i32>,
        ) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("click:{x:?},{y:?}"));
            Ok(())
        }
        async fn key_down(&self, token: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("down:{token}"));
            Ok(())
        }
        async fn key_up(&self, token: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("up:{token}"));
            Ok(())
        }
        async fn type_text(&self, text: &str) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("type:{text}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn explicit_coordinates_are_used_verbatim_without_clamping() {
        let config = KeepaliveConfig {
            threshold: Duration::from_secs(1),
            click_x: Some(-50),
            click_y: Some(99999),
        };
        let input = RecordingInput::default();
        perform_action(&config, &UnimplementedCapability, &input).await.unwrap();
        let events = input.events.lock().unwrap();
        assert!(events.iter().any(|e| e == "move:-50,99999"));
    }

    #[tokio::test]
    async fn action_ends_with_escape() {
        let config = KeepaliveConfig {
            threshold: Duration::from_secs(1),
            click_x: Some(0),
            click_y: Some(0),
        };
        let input = RecordingInput::default();
        perform_action(&config, &UnimplementedCapability, &input).await.unwrap();
        let events = input.events.lock().unwrap();
        assert_eq!(events.last().map(String::as_str), Some("up:esc"));
        assert_eq!(events[events.len() - 2], "down:esc");
    }

    #[tokio::test]
    async fn action_types_at_least_one_keystroke_per_phrase() {
        let config = KeepaliveConfig {
            threshold: Duration::from_secs(1),
            click_x: Some(0),
            click_y: Some(0),
        };
        let input = RecordingInput::default();
        perform_action(&config, &UnimplementedCapability, &input).await.unwrap();
        let events = input.events.lock().unwrap();
        let type_events = events.iter().filter(|e| e.starts_with("type:")).count();
        // §4.5: 2-5 phrases typed one character at a time; every phrase in
        // the pool is non-empty, so the minimum is 2 keystrokes.
        assert!(type_events >= MIN_PHRASES);
    }
}
