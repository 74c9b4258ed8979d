//! Mixtral through the Together inference API

use super::client::{invalid_response, AuthScheme, HttpClient};
use super::{require_api_key, suggestion_for, SYSTEM_PROMPT};
use async_trait::async_trait;
use quill_core::constants::{CORRECTION_MAX_TOKENS, CORRECTION_TEMPERATURE, DEFAULT_MIXTRAL_MODEL};
use quill_core::{Correction, CorrectionProvider, ProviderConfig, QuillResult};
use serde::{Deserialize, Serialize};

const PROVIDER_ID: &str = "mixtral";
const DEFAULT_BASE_URL: &str = "https://api.together.xyz";

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f32,
    max_tokens: i32,
    stop: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    output: Option<InferenceOutput>,
}

#[derive(Debug, Deserialize)]
struct InferenceOutput {
    choices: Vec<InferenceChoice>,
}

#[derive(Debug, Deserialize)]
struct InferenceChoice {
    text: String,
}

#[derive(Debug)]
pub struct MixtralProvider {
    client: HttpClient,
    model: String,
}

impl MixtralProvider {
    pub fn new(config: &ProviderConfig) -> QuillResult<Self> {
        let key = require_api_key(config)?;
        Ok(Self {
            client: HttpClient::new(PROVIDER_ID, config, DEFAULT_BASE_URL, AuthScheme::Bearer(key))?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MIXTRAL_MODEL.to_string()),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, context: &str) -> InferenceRequest<'a> {
        InferenceRequest {
            model: &self.model,
            prompt: format!("Sistema: {}\nUsuario: {}", SYSTEM_PROMPT, context),
            temperature: CORRECTION_TEMPERATURE,
            max_tokens: CORRECTION_MAX_TOKENS,
            stop: ["\n"],
        }
    }
}

fn parse_response(word: &str, response: InferenceResponse) -> QuillResult<Correction> {
    let text = response
        .output
        .and_then(|output| output.choices.into_iter().next())
        .map(|choice| choice.text)
        .ok_or_else(|| invalid_response(PROVIDER_ID, "missing output.choices"))?;
    suggestion_for(PROVIDER_ID, word, &text)
}

#[async_trait]
impl CorrectionProvider for MixtralProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction> {
        let response: InferenceResponse = self
            .client
            .post_json("inference", &self.request(context))
            .await?;
        parse_response(word, response)
    }
}
