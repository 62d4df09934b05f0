use std::future::Future;

use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ProviderEndpoints;
use crate::error::{AppError, Result};
use crate::store::{ApiProvider, Settings};

/// Literal every well-formed handoff starts with.
pub const HANDOFF_MARKER: &str = "SYSTEM HANDOFF:";

pub const MAX_OUTPUT_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.3;

pub const SYSTEM_INSTRUCTION: &str = r#"You are a context compression engine. Read the conversation below and write a "Context Handoff" that lets a fresh AI assistant continue the work without the original chat.

Begin your answer with the exact line "SYSTEM HANDOFF:" and then use this structure:

1. PROJECT / GOAL: what the user is trying to achieve, in one or two sentences.
2. STACK / KEY POINTS: languages, frameworks, tools, constraints, and decisions already made.
3. PROGRESS SNAPSHOT: what has been completed, what works, and what is broken.
4. IMMEDIATE NEXT STEP: the single most useful thing to do next.
5. CONTEXT: names, file paths, code identifiers, preferences, and other details that must not be lost.

If the conversation is not about a coding project, use this structure instead:

1. TOPIC: what the conversation is about.
2. KEY POINTS: the important facts, arguments, and conclusions so far.
3. STATUS: where the discussion stands.
4. NEXT STEP: what the user wants to explore or do next.
5. CONTEXT: preferences, tone, and details that must be preserved.

Be dense and specific. Do not add greetings or commentary outside the handoff."#;

/// Input side of one summarization request.
pub fn build_prompt(transcript: &str) -> String {
    let mut result = String::with_capacity(transcript.len() + 64);
    result.push_str("Conversation to compress:\n\n");
    result.push_str(transcript);
    result
}

/// Something that can turn a transcript into a handoff.
pub trait SummaryProvider: Send + Sync + 'static {
    fn summarize(
        &self,
        settings: &Settings,
        transcript: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

impl<P: SummaryProvider> SummaryProvider for std::sync::Arc<P> {
    fn summarize(
        &self,
        settings: &Settings,
        transcript: &str,
    ) -> impl Future<Output = Result<String>> + Send {
        (**self).summarize(settings, transcript)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Talks to the hosted OpenAI and Gemini endpoints.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl HttpProvider {
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(endpoints.timeout)
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoints })
    }

    async fn call_openai(&self, api_key: &str, transcript: &str) -> Result<String> {
        let prompt = build_prompt(transcript);
        let body = ChatRequest {
            model: &self.endpoints.openai_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_INSTRUCTION,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.endpoints.openai_base_url.trim_end_matches('/')
        );
        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(provider_failure(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|_| AppError::Provider("Invalid response format from OpenAI".to_string()))?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Provider("Invalid response format from OpenAI".to_string()))
    }

    async fn call_gemini(&self, api_key: &str, transcript: &str) -> Result<String> {
        let prompt = build_prompt(transcript);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "temperature": TEMPERATURE,
            }
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoints.gemini_base_url.trim_end_matches('/'),
            self.endpoints.gemini_model
        );
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(provider_failure(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|_| AppError::Provider("Invalid response format from Gemini".to_string()))?;
        json["candidates"][0]["content"]["parts"]
            .as_array()
            .and_then(|parts| parts.iter().find_map(|p| p["text"].as_str()))
            .map(str::to_string)
            .ok_or_else(|| AppError::Provider("Invalid response format from Gemini".to_string()))
    }
}

impl SummaryProvider for HttpProvider {
    async fn summarize(&self, settings: &Settings, transcript: &str) -> Result<String> {
        let api_key = settings.api_key.trim();
        debug!(provider = ?settings.api_provider, chars = transcript.len(), "calling provider");
        let reply = match settings.api_provider {
            ApiProvider::OpenAi => self.call_openai(api_key, transcript).await?,
            ApiProvider::Gemini => self.call_gemini(api_key, transcript).await?,
        };
        Ok(normalize_handoff(&reply))
    }
}

/// Provider's own error text when the body carries one, else a status message.
fn provider_failure(status: StatusCode, body: &str) -> AppError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => AppError::Provider(parsed.error.message),
        Err(_) => AppError::Provider(format!("API request failed with status {}", status.as_u16())),
    }
}

pub fn normalize_handoff(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with(HANDOFF_MARKER) {
        warn!("provider reply does not start with the handoff marker");
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_message_is_verbatim() {
        let err = provider_failure(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key provided: sk-xx","type":"invalid_request_error"}}"#,
        );
        assert_eq!(err.to_string(), "Incorrect API key provided: sk-xx");
    }

    #[test]
    fn undecodable_error_uses_status() {
        let err = provider_failure(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.to_string(), "API request failed with status 502");
    }

    #[test]
    fn prompt_carries_transcript() {
        let prompt = build_prompt("User: hi");
        assert!(prompt.ends_with("User: hi"));
    }

    #[test]
    fn instruction_describes_both_structures() {
        assert!(SYSTEM_INSTRUCTION.contains(HANDOFF_MARKER));
        assert!(SYSTEM_INSTRUCTION.contains("IMMEDIATE NEXT STEP"));
        assert!(SYSTEM_INSTRUCTION.contains("not about a coding project"));
    }
}
