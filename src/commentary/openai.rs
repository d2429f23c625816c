//! OpenAI-compatible commentary engine.
//!
//! Works with OpenAI, OpenRouter, vLLM, and any other service implementing
//! the OpenAI chat completions API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::engine::{CommentaryEngine, EngineError, TrackPrompt};

/// Persona used when the config does not provide one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a music writer who lives for the story behind \
    the song. You have read every liner note, every studio memoir, every obscure interview. When \
    you hear a track, share the one detail that makes someone hear it differently: who played \
    that guitar riff, or the studio accident that became the hook. No generalities. Give the \
    listener something they can take to a dinner party. 2-3 sentences. Sound like a friend \
    leaning over to whisper \"did you know...?\"";

/// Per-request timeout for commentary generation.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the prewarm ping.
const PREWARM_TIMEOUT: Duration = Duration::from_secs(5);

const GENERATION_TEMPERATURE: f32 = 0.5;

/// Commentary engine backed by an OpenAI-compatible chat completions API.
pub struct OpenAiEngine {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    system_prompt: String,
}

impl OpenAiEngine {
    /// Create a new engine.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the API (e.g., "https://api.openai.com/v1").
    /// * `model` - Model to use (e.g., "gpt-4o-mini").
    /// * `api_key` - Optional API key sent as a bearer token.
    /// * `system_prompt` - Persona override; `None` uses the default.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    fn request_body(&self, prompt: &TrackPrompt) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_message(prompt),
                },
            ],
            temperature: GENERATION_TEMPERATURE,
        }
    }

    /// The prompt builder output carries the full sectioned text; a bare
    /// track line covers the degenerate case where it is empty.
    fn user_message(prompt: &TrackPrompt) -> String {
        if prompt.context.is_empty() {
            format!("\"{}\" by {}", prompt.name, prompt.artist)
        } else {
            prompt.context.clone()
        }
    }
}

#[async_trait]
impl CommentaryEngine for OpenAiEngine {
    async fn prewarm(&self) {
        let url = format!("{}/models", self.base_url);

        let mut req_builder = self.client.get(&url).timeout(PREWARM_TIMEOUT);
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        match req_builder.send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Prewarm ping completed");
            }
            Err(e) => {
                warn!(error = %e, "Prewarm ping failed");
            }
        }
    }

    async fn generate(&self, prompt: &TrackPrompt) -> Result<String, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.request_body(prompt);

        debug!(
            model = %self.model,
            track = %prompt.name,
            artist = %prompt.artist,
            "Requesting commentary"
        );

        let mut req_builder = self
            .client
            .post(&url)
            .json(&request)
            .timeout(REQUEST_TIMEOUT);

        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::Timeout
            } else {
                EngineError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            EngineError::InvalidResponse(format!("Failed to parse chat response: {}", e))
        })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::InvalidResponse("No choices in response".to_string()))?;

        let text = choice.message.content.unwrap_or_default().trim().to_string();
        debug!(chars = text.len(), "Received commentary");
        Ok(text)
    }

    async fn cancel_current(&self) {
        // Dropping the in-flight request future is what aborts it.
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_with_context(context: &str) -> TrackPrompt {
        TrackPrompt {
            name: "Karma Police".to_string(),
            artist: "Radiohead".to_string(),
            album: "OK Computer".to_string(),
            genre: "Alternative".to_string(),
            context: context.to_string(),
        }
    }

    #[test]
    fn test_request_body_carries_persona_and_context() {
        let engine = OpenAiEngine::new(
            "http://localhost:1234/v1",
            "gpt-4o-mini",
            None,
            Some("You are terse.".to_string()),
        );
        let prompt = prompt_with_context("[Song]\nKarma Police\nRadiohead\n[End Song]");

        let body = engine.request_body(&prompt);

        assert_eq!(body.model, "gpt-4o-mini");
        assert_eq!(body.messages.len(), 2);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[0].content, "You are terse.");
        assert_eq!(body.messages[1].role, "user");
        assert_eq!(
            body.messages[1].content,
            "[Song]\nKarma Police\nRadiohead\n[End Song]"
        );
    }

    #[test]
    fn test_default_persona_when_none_configured() {
        let engine = OpenAiEngine::new("http://localhost:1234/v1", "gpt-4o-mini", None, None);
        let body = engine.request_body(&prompt_with_context("ctx"));
        assert_eq!(body.messages[0].content, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_user_message_falls_back_to_track_line() {
        let message = OpenAiEngine::user_message(&prompt_with_context(""));
        assert_eq!(message, "\"Karma Police\" by Radiohead");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": "A fine tune."},
                    "finish_reason": "stop"
                }
            ]
        }"#;

        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices.len(), 1);
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("A fine tune.")
        );
    }

    #[test]
    fn test_parse_chat_response_without_content() {
        let json = r#"{"choices": [{"message": {"role": "assistant"}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(response.choices[0].message.content.is_none());
    }

    #[test]
    fn test_request_serializes_expected_shape() {
        let engine = OpenAiEngine::new("http://x/v1", "m", None, None);
        let body = engine.request_body(&prompt_with_context("ctx"));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "m");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["messages"][1]["content"], "ctx");
    }
}
