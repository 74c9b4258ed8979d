//! Anthropic messages API

use super::client::{invalid_response, AuthScheme, HttpClient};
use super::{require_api_key, suggestion_for, SYSTEM_PROMPT};
use async_trait::async_trait;
use quill_core::constants::{CORRECTION_MAX_TOKENS, CORRECTION_TEMPERATURE, DEFAULT_ANTHROPIC_MODEL};
use quill_core::{Correction, CorrectionProvider, ProviderConfig, QuillResult};
use serde::{Deserialize, Serialize};

const PROVIDER_ID: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: i32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    client: HttpClient,
    model: String,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> QuillResult<Self> {
        let key = require_api_key(config)?;
        Ok(Self {
            client: HttpClient::new(
                PROVIDER_ID,
                config,
                DEFAULT_BASE_URL,
                AuthScheme::AnthropicKey(key),
            )?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, context: &'a str) -> MessageRequest<'a> {
        MessageRequest {
            model: &self.model,
            max_tokens: CORRECTION_MAX_TOKENS,
            temperature: CORRECTION_TEMPERATURE,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: context,
            }],
        }
    }
}

fn parse_response(word: &str, response: MessageResponse) -> QuillResult<Correction> {
    let text = response
        .content
        .into_iter()
        .find_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .ok_or_else(|| invalid_response(PROVIDER_ID, "no text block in response"))?;
    suggestion_for(PROVIDER_ID, word, &text)
}

#[async_trait]
impl CorrectionProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction> {
        let response: MessageResponse = self
            .client
            .post_json("messages", &self.request(context))
            .await?;
        parse_response(word, response)
    }
}
