use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Shown in the transcript when a chat reply could not be generated.
pub const CHAT_FALLBACK: &str =
    "I'm sorry, I'm having trouble connecting to my brain right now. Please try again in a moment.";

/// Shown in place of dashboard insights when the call fails.
pub const INSIGHTS_FALLBACK: &str = "Unable to generate insights at this time.";

/// Author of a message, using the names the Gemini API expects on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One prior turn handed to the gateway for conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl HistoryEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    #[error("request to the model endpoint failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed JSON exchanged with the model endpoint: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GatewayResult = Result<String, GatewayError>;

/// The hosted model as seen by the chat session and the insights command.
///
/// Model identity and system instructions belong to the implementation; callers
/// only supply the prompt and, for chat, the prior turns.
#[async_trait]
pub trait AiGateway: Send + Sync {
    async fn generate_ai_response(&self, prompt: &str, history: &[HistoryEntry]) -> GatewayResult;

    async fn get_dashboard_insights(&self, summary: &str) -> GatewayResult;
}

/// Renders an insights result as display text.
pub fn insights_text(result: &GatewayResult) -> String {
    match result {
        Ok(text) => text.clone(),
        Err(e) => {
            warn!("Dashboard insights error: {}", e);
            INSIGHTS_FALLBACK.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_entry_serializes_as_gemini_content() {
        let entry = HistoryEntry::new(Role::Model, "Hello");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "role": "model", "parts": [{ "text": "Hello" }] })
        );
    }

    #[test]
    fn failed_insights_render_as_fallback_text() {
        let failed: GatewayResult = Err(GatewayError::MissingApiKey);
        assert_eq!(insights_text(&failed), INSIGHTS_FALLBACK);

        let ok: GatewayResult = Ok("Revenue is up.".to_string());
        assert_eq!(insights_text(&ok), "Revenue is up.");
    }
}
