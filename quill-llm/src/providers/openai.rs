//! OpenAI chat completions

use super::client::{invalid_response, AuthScheme, HttpClient};
use super::{require_api_key, suggestion_for, SYSTEM_PROMPT};
use async_trait::async_trait;
use quill_core::constants::{CORRECTION_MAX_TOKENS, CORRECTION_TEMPERATURE, DEFAULT_OPENAI_MODEL};
use quill_core::{Correction, CorrectionProvider, ProviderConfig, QuillResult};
use serde::{Deserialize, Serialize};

const PROVIDER_ID: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: i32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Correction through the OpenAI chat completions API.
#[derive(Debug)]
pub struct OpenAiProvider {
    client: HttpClient,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> QuillResult<Self> {
        let key = require_api_key(config)?;
        Ok(Self {
            client: HttpClient::new(PROVIDER_ID, config, DEFAULT_BASE_URL, AuthScheme::Bearer(key))?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, context: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: context,
                },
            ],
            temperature: CORRECTION_TEMPERATURE,
            max_tokens: CORRECTION_MAX_TOKENS,
        }
    }
}

fn parse_response(word: &str, response: ChatResponse) -> QuillResult<Correction> {
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| invalid_response(PROVIDER_ID, "no choices in response"))?;
    suggestion_for(PROVIDER_ID, word, &text)
}

#[async_trait]
impl CorrectionProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction> {
        let response: ChatResponse = self
            .client
            .post_json("chat/completions", &self.request(context))
            .await?;
        parse_response(word, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::QuillError;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(&ProviderConfig {
            kind: quill_core::ProviderKind::OpenAi,
            api_key: Some("sk-test".to_string()),
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_shape() {
        let provider = provider();
        let json = serde_json::to_value(provider.request("creo qe esto")).unwrap();
        assert_eq!(json["model"], DEFAULT_OPENAI_MODEL);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(json["messages"][1]["content"], "creo qe esto");
        assert_eq!(json["max_tokens"], CORRECTION_MAX_TOKENS);
    }

    #[test]
    fn test_parse_response() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":" que \n"}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_response("qe", response).unwrap(), Correction::new("que", true));

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(parse_response("qe", empty), Err(QuillError::Provider(_))));
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = OpenAiProvider::new(&ProviderConfig::default()).unwrap_err();
        assert!(matches!(err, QuillError::Config(_)));
    }
}
