use std::env;

use super::conversation_state::GREETING;

/// Who is talking to whom in a chat session.
///
/// Built once at startup and handed to the chat shell instead of being read
/// from globals by whatever needs it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_name: String,
    pub assistant_name: String,
    pub greeting: String,
    pub model: String,
    /// Entries kept in the line editor's in-memory history.
    pub history_size: usize,
}

impl SessionContext {
    pub fn new(model: impl Into<String>) -> Self {
        let user_name = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "you".to_string());

        Self {
            user_name,
            assistant_name: "Nexus AI".to_string(),
            greeting: GREETING.to_string(),
            model: model.into(),
            history_size: 100,
        }
    }

    pub fn banner(&self) -> String {
        format!("{} (powered by {})", self.assistant_name, self.model)
    }
}
