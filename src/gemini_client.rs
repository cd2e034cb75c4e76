use std::env;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

use crate::gateway::{AiGateway, GatewayError, GatewayResult, HistoryEntry, Part, Role};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const CHAT_SYSTEM_INSTRUCTION: &str = "You are 'Nexus AI', a helpful and professional assistant integrated into a user's dashboard. You help with data analysis, productivity tips, and general inquiries. Keep responses concise and formatted in clean Markdown.";

const INSIGHTS_SYSTEM_INSTRUCTION: &str =
    "You are a data analyst. Provide brief, actionable insights based on the numbers provided.";

/// Connection settings for the Gemini API, resolved from the environment and CLI flags.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Url,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|key| !key.trim().is_empty());

        let model = lookup("NEXUS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = parse_base_url(
            &lookup("NEXUS_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;

        let timeout = match lookup("NEXUS_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .wrap_err_with(|| format!("NEXUS_TIMEOUT_SECS is not a number of seconds: {raw}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_key,
            model,
            base_url,
            timeout: Duration::from_secs(timeout),
        })
    }

    /// Applies command line flags on top of the environment values.
    pub fn with_overrides(
        mut self,
        model: Option<String>,
        base_url: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<Self> {
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(base_url) = base_url {
            self.base_url = parse_base_url(&base_url)?;
        }
        if let Some(secs) = timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        Ok(self)
    }

    pub fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .map_err(|e| eyre!("invalid endpoint for model {}: {}", self.model, e))
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    // Url::join replaces the last path segment unless the base ends with a slash.
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).wrap_err_with(|| format!("invalid API base URL: {raw}"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: SystemInstruction,
    contents: Vec<HistoryEntry>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl GenerateContentRequest {
    fn new(system_instruction: &str, contents: Vec<HistoryEntry>) -> Self {
        Self {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_instruction.to_string(),
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: 8192,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate; empty when the model produced none.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Builds the chat `contents`: prior turns followed by the new prompt.
///
/// The API rejects conversations that open with a model turn, so the seeded
/// greeting (and anything else model-authored before the first user turn) is
/// left off the wire.
fn chat_contents(prompt: &str, history: &[HistoryEntry]) -> Vec<HistoryEntry> {
    history
        .iter()
        .skip_while(|entry| entry.role == Role::Model)
        .cloned()
        .chain(std::iter::once(HistoryEntry::new(Role::User, prompt)))
        .collect()
}

fn insights_prompt(summary: &str) -> String {
    format!("Analyze this dashboard data and provide 3 quick bullet-point insights: {summary}")
}

pub struct GeminiClient {
    config: GeminiConfig,
    endpoint: Url,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        Self::with_builder(config, reqwest::Client::builder())
    }

    fn with_builder(config: GeminiConfig, builder: reqwest::ClientBuilder) -> Result<Self> {
        let endpoint = config.endpoint()?;

        let client = builder
            .timeout(config.timeout)
            .build()
            .wrap_err("failed to build HTTP client")?;

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn generate_content(
        &self,
        system_instruction: &str,
        contents: Vec<HistoryEntry>,
    ) -> GatewayResult {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GatewayError::MissingApiKey)?;

        let request_body = GenerateContentRequest::new(system_instruction, contents);

        debug!(
            "Sending request to Gemini API ({}): {}",
            self.config.model,
            serde_json::to_string_pretty(&request_body)?
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("API request failed with status {}: {}", status, body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        debug!("Received response from Gemini API: {}", body);

        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;

        if let Some(reason) = parsed
            .candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.as_deref())
            .filter(|reason| *reason != "STOP")
        {
            info!("Gemini response finished with reason {}", reason);
        }

        Ok(parsed.text())
    }
}

#[async_trait]
impl AiGateway for GeminiClient {
    async fn generate_ai_response(&self, prompt: &str, history: &[HistoryEntry]) -> GatewayResult {
        self.generate_content(CHAT_SYSTEM_INSTRUCTION, chat_contents(prompt, history))
            .await
    }

    async fn get_dashboard_insights(&self, summary: &str) -> GatewayResult {
        let contents = vec![HistoryEntry::new(Role::User, insights_prompt(summary))];
        self.generate_content(INSIGHTS_SYSTEM_INSTRUCTION, contents)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn config_defaults_without_environment() {
        let config = GeminiConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url.as_str(), "https://generativelanguage.googleapis.com/");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn gemini_key_takes_precedence_over_generic_key() {
        let config = GeminiConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "gemini-key"),
            ("API_KEY", "generic-key"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("gemini-key"));

        let config = GeminiConfig::from_lookup(lookup_from(&[("API_KEY", "generic-key")])).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("generic-key"));
    }

    #[test]
    fn blank_key_counts_as_missing() {
        let config = GeminiConfig::from_lookup(lookup_from(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn invalid_timeout_is_a_config_error() {
        let err = GeminiConfig::from_lookup(lookup_from(&[("NEXUS_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("NEXUS_TIMEOUT_SECS"));
    }

    #[test]
    fn flags_override_environment() {
        let config = GeminiConfig::from_lookup(lookup_from(&[("NEXUS_MODEL", "env-model")]))
            .unwrap()
            .with_overrides(
                Some("flag-model".to_string()),
                Some("http://localhost:8080/proxy".to_string()),
                Some(5),
            )
            .unwrap();
        assert_eq!(config.model, "flag-model");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "http://localhost:8080/proxy/v1beta/models/flag-model:generateContent"
        );
    }

    #[test]
    fn endpoint_targets_generate_content() {
        let config = GeminiConfig::from_lookup(lookup_from(&[("NEXUS_MODEL", "gemini-2.0-flash")]))
            .unwrap();
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn chat_contents_drop_leading_model_turns_and_append_prompt() {
        let history = vec![
            HistoryEntry::new(Role::Model, "Hello! I'm Nexus AI."),
            HistoryEntry::new(Role::User, "hi"),
            HistoryEntry::new(Role::Model, "Hi there."),
        ];

        let contents = chat_contents("What's my revenue?", &history);

        assert_eq!(
            contents,
            vec![
                HistoryEntry::new(Role::User, "hi"),
                HistoryEntry::new(Role::Model, "Hi there."),
                HistoryEntry::new(Role::User, "What's my revenue?"),
            ]
        );
    }

    #[test]
    fn request_body_uses_gemini_field_names() {
        let request = GenerateContentRequest::new(
            INSIGHTS_SYSTEM_INSTRUCTION,
            vec![HistoryEntry::new(Role::User, insights_prompt("Revenue: $1"))],
        );
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            INSIGHTS_SYSTEM_INSTRUCTION
        );
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["contents"][0]["parts"][0]["text"],
            "Analyze this dashboard data and provide 3 quick bullet-point insights: Revenue: $1"
        );
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(value["generationConfig"]["topK"], 40);
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {
                    "content": { "role": "model", "parts": [{ "text": "Revenue is " }, { "text": "$128,430." }] },
                    "finishReason": "STOP"
                },
                {
                    "content": { "role": "model", "parts": [{ "text": "ignored" }] }
                }
            ]
        }))
        .unwrap();

        assert_eq!(response.text(), "Revenue is $128,430.");
    }

    #[test]
    fn response_without_candidates_is_empty_text() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap();
        assert_eq!(response.text(), "");

        let response: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).unwrap();
        assert_eq!(response.text(), "");
    }

    #[test]
    fn api_error_message_prefers_structured_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(api_error_message(body), "API key not valid.");
        assert_eq!(api_error_message("  Bad Gateway \n"), "Bad Gateway");
    }

    /// Accepts one HTTP request on a local port, answers it with `status_line`
    /// and `body`, and hands back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let length = head
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .and_then(|value| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{addr}"), handle)
    }

    fn local_client(base_url: &str) -> GeminiClient {
        let config = GeminiConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "test-key"),
            ("NEXUS_MODEL", "test-model"),
            ("NEXUS_API_BASE_URL", base_url),
        ]))
        .unwrap();
        GeminiClient::with_builder(config, reqwest::Client::builder().no_proxy()).unwrap()
    }

    #[tokio::test]
    async fn non_success_status_maps_to_api_error() {
        let (base_url, server) = serve_once(
            "400 Bad Request",
            r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#,
        )
        .await;
        let client = local_client(&base_url);

        let result = client.generate_ai_response("hi", &[]).await;

        match result {
            Err(GatewayError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("expected API error, got {other:?}"),
        }

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /v1beta/models/test-model:generatecontent "));
        assert!(request.contains("x-goog-api-key: test-key"));
        assert!(!request.contains("key=test-key"));
    }

    #[tokio::test]
    async fn successful_response_returns_candidate_text() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Revenue is $128,430."}]},"finishReason":"STOP"}]}"#,
        )
        .await;
        let client = local_client(&base_url);

        let history = vec![HistoryEntry::new(Role::Model, "Hello...")];
        let reply = client
            .generate_ai_response("What's my revenue?", &history)
            .await
            .unwrap();
        assert_eq!(reply, "Revenue is $128,430.");

        let request = server.await.unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            sent["contents"],
            json!([{ "role": "user", "parts": [{ "text": "What's my revenue?" }] }])
        );
        assert_eq!(
            sent["systemInstruction"]["parts"][0]["text"],
            CHAT_SYSTEM_INSTRUCTION
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let config = GeminiConfig::from_lookup(lookup_from(&[(
            "NEXUS_API_BASE_URL",
            "http://127.0.0.1:9",
        )]))
        .unwrap();
        let client = GeminiClient::new(config).unwrap();
        assert!(!client.has_api_key());

        let result = client.generate_ai_response("hi", &[]).await;
        assert!(matches!(result, Err(GatewayError::MissingApiKey)));

        let result = client.get_dashboard_insights("Revenue: $1").await;
        assert!(matches!(result, Err(GatewayError::MissingApiKey)));
    }
}
