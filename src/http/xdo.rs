//! XDO sequence grammar (§6, glossary): whitespace-separated chords, each
//! chord a `+`-joined list of modifier and literal key tokens.
//!
//! `"ctrl+c ctrl+v"` synthesizes, in order: Ctrl-down, C-down, C-up,
//! Ctrl-up, Ctrl-down, V-down, V-up, Ctrl-up (§8 scenario 6) — modifiers in
//! a chord go down before the literal keys and come up in reverse order
//! afterward, exactly once per chord.

use crate::capability::InputSynthesis;

const MODIFIERS: &[&str] = &["ctrl", "shift", "alt", "super", "meta"];

fn is_modifier(token: &str) -> bool {
    MODIFIERS.contains(&token)
}

/// One `+`-joined chord, split into its modifier and literal tokens while
/// preserving the order each appeared in.
struct Chord<'a> {
    modifiers: Vec<&'a str>,
    literals: Vec<&'a str>,
}

fn parse_chord(raw: &str) -> Chord<'_> {
    let mut modifiers = Vec::new();
    let mut literals = Vec::new();
    for token in raw.split('+').map(str::trim).filter(|t| !t.is_empty()) {
        if is_modifier(token) {
            modifiers.push(token);
        } else {
            literals.push(token);
        }
    }
    Chord { modifiers, literals }
}

/// Parse and synthesize an entire sequence against `input`.
pub async fn synthesize(input: &dyn InputSynthesis, sequence: &str) -> anyhow::Result<()> {
    for raw_chord in sequence.split_whitespace() {
        let chord = parse_chord(raw_chord);

        for m in &chord.modifiers {
            input.key_down(m).await?;
        }
        for key in &chord.literals {
            input.key_down(key).await?;
            input.key_up(key).await?;
        }
        for m in chord.modifiers.iter().rev() {
            input.key_up(m).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ClickAction, MouseButton};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingInput {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InputSynthesis for RecordingInput {
        async fn mouse_position(&self) -> anyhow::Result<(i32, i32)> {
            Ok((0, 0))
        }
        async fn mouse_move_to(&self, _x: i32, _y: i32) -> anyhow::Result<()> {
            Ok(())
        }
        async fn mouse_button(
            &self,
            _button: MouseButton,
            _action: ClickAction,
            _x: Option<i32>,
            _y: Option<i32>,
        ) -> anyhow::Result<()> {
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
        async fn type_text(&self, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ctrl_c_ctrl_v_matches_expected_event_order() {
        let input = RecordingInput::default();
        synthesize(&input, "ctrl+c ctrl+v").await.unwrap();
        let events = input.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "down:ctrl", "down:c", "up:c", "up:ctrl", "down:ctrl", "down:v", "up:v", "up:ctrl",
            ]
        );
    }

    #[tokio::test]
    async fn multi_modifier_chord_releases_in_reverse() {
        let input = RecordingInput::default();
        synthesize(&input, "ctrl+shift+t").await.unwrap();
        let events = input.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["down:ctrl", "down:shift", "down:t", "up:t", "up:shift", "up:ctrl"]
        );
    }

    #[tokio::test]
    async fn bare_literal_needs_no_modifiers() {
        let input = RecordingInput::default();
        synthesize(&input, "enter").await.unwrap();
        let events = input.events.lock().unwrap().clone();
        assert_eq!(events, vec!["down:enter", "up:enter"]);
    }
}
