use serde::{Deserialize, Serialize};

/// One role-tagged unit of a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatScope {
    Private,
    Group,
}

/// Derives the rolling-history bucket key for one conversation.
/// Private and group conversations for the same numeric id never collide.
pub fn history_key(scope: ChatScope, id: i64) -> String {
    match scope {
        ChatScope::Private => format!("history:u{id}"),
        ChatScope::Group => format!("history:g{id}"),
    }
}
