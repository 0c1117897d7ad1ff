//! Provider for OpenAI-compatible HTTP APIs

use super::stream::{decode_lines, LineEvent};
use super::{check_response, http_client, AiProvider, ChunkStream, GenerationRequest, ModelInfo, ProviderResult};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Client for `/embeddings`, `/chat/completions` and `/models`
pub struct OpenAiProvider {
    id: String,
    base_url: String,
    api_key: Option<Secret<String>>,
    embedding_model: String,
    chat_model: String,
    timeout: Duration,
    http_client: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [super::ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiProvider {
    /// Create a provider from its configuration
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self::with_http_client(config, http_client()?))
    }

    /// Create provider with custom HTTP client
    pub fn with_http_client(config: &ProviderConfig, http_client: Client) -> Self {
        Self {
            id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            http_client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn chat_body<'a>(&'a self, request: &'a GenerationRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.chat_model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }
}

/// Parse one line of an OpenAI server-sent event stream
pub fn parse_openai_sse_line(line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };

    let data = data.trim();
    if data == "[DONE]" {
        return LineEvent::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(text) if !text.is_empty() => LineEvent::Chunk(text),
            _ => LineEvent::Skip,
        },
        Err(e) => LineEvent::Error(ProviderError::InvalidResponse(e.to_string())),
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, text), fields(provider = %self.id))]
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };

        let response = self
            .authorize(self.http_client.post(self.url("/embeddings")))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let parsed: EmbeddingResponse = check_response(response).await?.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding data".to_string()))?;

        debug!(dimension = embedding.len(), "Received embedding");
        Ok(embedding)
    }

    #[instrument(skip(self, request), fields(provider = %self.id))]
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let response = self
            .authorize(self.http_client.post(self.url("/chat/completions")))
            .timeout(self.timeout)
            .json(&self.chat_body(request, false))
            .send()
            .await?;

        let parsed: ChatResponse = check_response(response).await?.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".to_string()))
    }

    #[instrument(skip(self, request), fields(provider = %self.id))]
    async fn generate_stream(&self, request: &GenerationRequest) -> ProviderResult<ChunkStream> {
        // No whole-request timeout here; the manager bounds the gap between chunks.
        let response = self
            .authorize(self.http_client.post(self.url("/chat/completions")))
            .header("Accept", "text/event-stream")
            .json(&self.chat_body(request, true))
            .send()
            .await?;

        let response = check_response(response).await?;
        Ok(decode_lines(response.bytes_stream(), parse_openai_sse_line))
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        let response = self
            .authorize(self.http_client.get(self.url("/models")))
            .timeout(self.timeout)
            .send()
            .await?;

        let parsed: ModelList = check_response(response).await?.json().await?;
        Ok(parsed
            .data
            .into_iter()
            .map(|m| ModelInfo {
                provider: self.id.clone(),
                name: m.id,
            })
            .collect())
    }

    async fn health_check(&self) -> ProviderResult<()> {
        self.list_models().await.map(|_| ())
    }
}
