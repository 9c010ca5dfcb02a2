//! Conversation history kept between turns of `mdrag chat` and HTTP
//! sessions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn pop_last(&mut self) -> Option<Turn> {
        self.turns.pop()
    }

    /// Remove the last exchange so its question can be asked again.
    ///
    /// Drops a trailing assistant reply (if any), then pops and returns the
    /// user message before it. `None` when there is no user message to
    /// retry; the conversation is left untouched in that case.
    pub fn pop_last_exchange_reply(&mut self) -> Option<String> {
        let user_pos = self.turns.iter().rposition(|t| t.role == Role::User)?;
        let request = self.turns[user_pos].content.clone();
        self.turns.truncate(user_pos);
        Some(request)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Render history as `"User: ...\n\nAssistant: ...\n\n"` for the
    /// analyst prompt.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            let label = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push_str("\n\n");
        }
        out
    }
}
