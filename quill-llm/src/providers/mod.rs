//! External correction providers
//!
//! Each provider sends the surrounding text with a fixed Spanish
//! correction instruction and takes the trimmed completion as the
//! correction of the word.

pub mod anthropic;
pub mod client;
pub mod mixtral;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use client::{AuthScheme, HttpClient};
pub use mixtral::MixtralProvider;
pub use openai::OpenAiProvider;

use quill_core::{ConfigError, Correction, CorrectionProvider, ProviderConfig, ProviderKind, QuillResult};
use std::sync::Arc;

/// Instruction sent with every correction request.
pub const SYSTEM_PROMPT: &str = "Eres un asistente que corrige texto a español correcto.";

/// Build the provider selected by `config`, or `None` in local-only mode.
pub fn build_provider(config: &ProviderConfig) -> QuillResult<Option<Arc<dyn CorrectionProvider>>> {
    let provider: Arc<dyn CorrectionProvider> = match config.kind {
        ProviderKind::Local => return Ok(None),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderKind::Mixtral => Arc::new(MixtralProvider::new(config)?),
    };
    tracing::info!(provider = %provider.provider_id(), "Correction provider configured");
    Ok(Some(provider))
}

fn require_api_key(config: &ProviderConfig) -> QuillResult<String> {
    config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ConfigError::MissingRequired {
                field: "provider.api_key".to_string(),
            }
            .into()
        })
}

/// Turn a raw completion into a correction of `word`.
fn suggestion_for(provider: &str, word: &str, raw: &str) -> QuillResult<Correction> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(client::invalid_response(provider, "empty completion"));
    }
    Ok(Correction::from_suggestion(word, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::QuillError;

    #[test]
    fn test_local_builds_no_provider() {
        assert!(build_provider(&ProviderConfig::local()).unwrap().is_none());
    }

    #[test]
    fn test_each_remote_kind_builds() {
        for (kind, id) in [
            (ProviderKind::OpenAi, "openai"),
            (ProviderKind::Anthropic, "anthropic"),
            (ProviderKind::Mixtral, "mixtral"),
        ] {
            let config = ProviderConfig {
                kind,
                api_key: Some("key".to_string()),
                ..ProviderConfig::default()
            };
            let provider = build_provider(&config).unwrap().unwrap();
            assert_eq!(provider.provider_id(), id);
        }
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let config = ProviderConfig {
            kind: ProviderKind::Anthropic,
            api_key: Some("   ".to_string()),
            ..ProviderConfig::default()
        };
        assert!(matches!(build_provider(&config), Err(QuillError::Config(_))));
    }

    #[test]
    fn test_suggestion_trimmed_and_compared() {
        assert_eq!(
            suggestion_for("openai", "casa", "  casa\n").unwrap(),
            Correction::unchanged("casa")
        );
        assert!(suggestion_for("openai", "casa", "   ").is_err());
    }
}
