//! Immutable conversation memory.
//!
//! Rebuilt fresh per request from the persisted message rows — there is no
//! cross-request state. Row order is conversation order.

use crate::ai::{ChatRole, ChatTurn};
use crate::storage::ChatMessageRow;

/// The prior turns of a chat, in conversation order.
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    /// Replay persisted rows into history turns: `user` rows become user
    /// turns, `ai` rows become assistant turns. Rows with any other sender
    /// value are skipped.
    pub fn from_rows(rows: &[ChatMessageRow]) -> Self {
        let turns = rows
            .iter()
            .filter_map(|row| match row.sender.as_str() {
                "user" => Some(ChatTurn::user(row.content.clone())),
                "ai" => Some(ChatTurn::assistant(row.content.clone())),
                _ => None,
            })
            .collect();
        Self { turns }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Plain-text rendering (`user: ...` / `ai: ...` lines) for the title
    /// summary prompt.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                let label = match t.role {
                    ChatRole::Assistant => "ai",
                    _ => "user",
                };
                format!("{label}: {}", t.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
