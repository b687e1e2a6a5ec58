//! Read-only projections of a transcript for display.

use serde::Serialize;

use crate::transcript::{Role, Transcript, Turn};

pub const USER_NAME: &str = "You";
pub const ASSISTANT_NAME: &str = "MindSeek AI";

/// What the templates and the JSON API see for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnView {
    pub id: String,
    pub role: Role,
    pub author: &'static str,
    pub content: String,
    pub time: String,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        Self {
            id: turn.id().to_string(),
            role: turn.role(),
            author: author_for(turn.role()),
            content: turn.content().to_string(),
            time: turn.timestamp().format("%H:%M").to_string(),
        }
    }
}

pub fn author_for(role: Role) -> &'static str {
    match role {
        Role::User => USER_NAME,
        Role::Assistant => ASSISTANT_NAME,
    }
}

pub fn views(transcript: &Transcript) -> Vec<TurnView> {
    transcript.all().iter().map(TurnView::from).collect()
}

pub fn render_turn(turn: &Turn) -> String {
    format!(
        "[{}] {}: {}",
        turn.timestamp().format("%H:%M"),
        author_for(turn.role()),
        turn.content()
    )
}

/// Terminal rendering of the whole transcript, one turn per block.
pub fn render_plain(transcript: &Transcript) -> String {
    transcript
        .all()
        .iter()
        .map(render_turn)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cuts `text` to at most `max_chars` characters without splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Growing prefixes of a reply for the typing effect. The text is already
/// complete, so this is only pacing.
pub struct TypingFrames<'a> {
    text: &'a str,
    pos: usize,
    chars_per_frame: usize,
}

impl<'a> TypingFrames<'a> {
    pub fn new(text: &'a str, chars_per_frame: usize) -> Self {
        Self {
            text,
            pos: 0,
            chars_per_frame: chars_per_frame.max(1),
        }
    }
}

impl<'a> Iterator for TypingFrames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }
        let rest = &self.text[self.pos..];
        let step = rest
            .char_indices()
            .nth(self.chars_per_frame)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        self.pos += step;
        Some(&self.text[..self.pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_lists_turns_in_order() {
        let mut transcript = Transcript::new();
        transcript.append(Role::User, "2+2?");
        transcript.append(Role::Assistant, "4");

        let out = render_plain(&transcript);
        let you = out.find("You: 2+2?").unwrap();
        let ai = out.find("MindSeek AI: 4").unwrap();
        assert!(you < ai);
        // Rendering is a projection; nothing changes.
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_render_plain_empty() {
        assert_eq!(render_plain(&Transcript::new()), "");
    }

    #[test]
    fn test_turn_view_fields() {
        let mut transcript = Transcript::new();
        let turn = transcript.append(Role::Assistant, "hello");
        let view = TurnView::from(turn);
        assert_eq!(view.id, "msg-1");
        assert_eq!(view.author, "MindSeek AI");
        assert_eq!(view.time.len(), 5);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("🧠🧠🧠", 2), "🧠🧠");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_typing_frames_grow_to_full_text() {
        let frames: Vec<&str> = TypingFrames::new("abcdefg", 3).collect();
        assert_eq!(frames, vec!["abc", "abcdef", "abcdefg"]);

        let frames: Vec<&str> = TypingFrames::new("ñandú", 2).collect();
        assert_eq!(frames.last().copied(), Some("ñandú"));

        assert_eq!(TypingFrames::new("", 4).count(), 0);
        // Zero is clamped so the iterator always advances.
        assert_eq!(TypingFrames::new("ab", 0).count(), 2);
    }
}
