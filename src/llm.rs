//! Chat-completion providers, used only by entity extraction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{LlmProvider, ProviderConfig},
    embedding::{
        DEFAULT_OLLAMA_URL,
        DEFAULT_OPENAI_URL,
        check_status,
        http_client,
        openai_api_key,
    },
    error::{Error, Result},
};

pub const DEFAULT_OLLAMA_CHAT_MODEL: &str = "llama3.1";
pub const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// The assistant's reply, trimmed.
    fn chat(&self, messages: &[Message]) -> Result<String>;
}

pub fn chat_model_from_config(config: &ProviderConfig) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> = match config.llm_provider {
        LlmProvider::Ollama => Arc::new(OllamaChat::new(
            config
                .llm_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_CHAT_MODEL.to_string()),
            config.llm_base_url.clone(),
        )?),
        LlmProvider::OpenAi => Arc::new(OpenAiChat::new(
            config
                .llm_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_CHAT_MODEL.to_string()),
            openai_api_key()?,
            config.llm_base_url.clone(),
        )?),
    };
    Ok(model)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

/// Chat through an Ollama server (`POST {base}/api/chat`).
pub struct OllamaChat {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(model: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
        })
    }
}

impl ChatModel for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat(&self, messages: &[Message]) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "ollama chat");
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream: Some(false),
            })
            .send()?;
        let response = check_status(response, "ollama").map_err(Error::Llm)?;
        let body: OllamaChatResponse = response.json()?;
        Ok(body.message.content.trim().to_string())
    }
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiReply,
}

#[derive(Deserialize)]
struct OpenAiReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat through an OpenAI-compatible endpoint (`POST {base}/v1/chat/completions`).
pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
        })
    }
}

impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        "openai"
    }

    fn chat(&self, messages: &[Message]) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "openai chat");
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream: None,
            })
            .send()?;
        let response = check_status(response, "openai").map_err(Error::Llm)?;
        let body: OpenAiChatResponse = response.json()?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| Error::Llm("openai returned no choices".into()))
    }
}
