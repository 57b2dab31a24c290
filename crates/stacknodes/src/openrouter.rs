use crate::sse;
use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::Serialize;
use stackcore::{CollaboratorError, FragmentStream, GenerationRequest, Generator, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Models the generator accepts as-is.
pub const KNOWN_MODELS: [&str; 6] = [
    "anthropic/claude-3.5-sonnet",
    "anthropic/claude-3.5-haiku",
    "anthropic/claude-3-opus",
    "google/gemini-pro",
    "google/gemini-1.5-flash",
    "meta-llama/llama-3-8b-instruct",
];

const LEGACY_MODELS: [&str; 2] = ["claude-3-5-sonnet-latest", "claude-sonnet-4-5-thinking"];

/// Map a requested model onto one the provider serves.
///
/// Legacy editor values are rewritten to the default model; anything else
/// outside the catalog is rejected.
pub fn resolve_model(requested: &str) -> Result<&'static str, CollaboratorError> {
    if let Some(known) = KNOWN_MODELS.iter().find(|m| **m == requested) {
        return Ok(*known);
    }

    if requested.is_empty() || requested.starts_with("gpt") || LEGACY_MODELS.contains(&requested) {
        tracing::warn!(requested = %requested, fallback = DEFAULT_MODEL, "Substituting legacy model");
        return Ok(DEFAULT_MODEL);
    }

    Err(CollaboratorError::UnsupportedModel(requested.to_string()))
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    /// Used when the request carries no credential of its own.
    pub api_key: Option<String>,
    pub max_tokens_cap: u32,
    pub system_prompt: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: OPENROUTER_BASE_URL.to_string(),
            api_key: None,
            max_tokens_cap: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Streaming chat-completions client for OpenRouter.
pub struct OpenRouterGenerator {
    http: reqwest::Client,
    config: GeneratorConfig,
}

impl OpenRouterGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, CollaboratorError> {
        let model = resolve_model(&request.model)?;
        let api_key = request
            .credential
            .or_else(|| self.config.api_key.clone())
            .filter(|key| !key.is_empty())
            .ok_or(CollaboratorError::MissingCredential("generation"))?;

        let body = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens.min(self.config.max_tokens_cap),
            stream: true,
        };

        tracing::debug!(model = %model, max_tokens = body.max_tokens, "Requesting completion stream");

        let response = self
            .http
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(CollaboratorError::Request(format!("HTTP {}: {}", status, body)));
        }

        Ok(sse::text_fragments(response.bytes_stream()).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_passes() {
        assert_eq!(
            resolve_model("google/gemini-1.5-flash"),
            Ok("google/gemini-1.5-flash")
        );
    }

    #[test]
    fn test_legacy_model_falls_back() {
        assert_eq!(resolve_model("gpt-4o-mini"), Ok(DEFAULT_MODEL));
        assert_eq!(resolve_model("claude-3-5-sonnet-latest"), Ok(DEFAULT_MODEL));
    }

    #[test]
    fn test_unknown_model_rejected() {
        assert_eq!(
            resolve_model("acme/brain-9000"),
            Err(CollaboratorError::UnsupportedModel("acme/brain-9000".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_request() {
        let generator = OpenRouterGenerator::new(GeneratorConfig::default());
        let result = generator
            .generate(GenerationRequest {
                model: DEFAULT_MODEL.to_string(),
                prompt: "hi".into(),
                temperature: 0.7,
                max_tokens: 64,
                credential: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(CollaboratorError::MissingCredential("generation"))
        ));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let generator = OpenRouterGenerator::new(GeneratorConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        });
        assert_eq!(generator.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
