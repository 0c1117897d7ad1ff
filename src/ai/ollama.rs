//! Provider for a local Ollama server

use super::stream::{decode_lines, LineEvent};
use super::{check_response, http_client, AiProvider, ChatMessage, ChunkStream, GenerationRequest, ModelInfo, ProviderResult};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// Client for `/api/embeddings`, `/api/chat` and `/api/tags`
pub struct OllamaProvider {
    id: String,
    base_url: String,
    embedding_model: String,
    chat_model: String,
    timeout: Duration,
    http_client: Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

impl OllamaProvider {
    /// Create a provider from its configuration
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        Ok(Self {
            id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            http_client: http_client()?,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn chat_body<'a>(&'a self, request: &'a GenerationRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.chat_model,
            messages: &request.messages,
            stream,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

/// Parse one NDJSON line of an Ollama chat stream
pub fn parse_ollama_line(line: &str) -> LineEvent {
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }

    match serde_json::from_str::<ChatResponse>(line) {
        Ok(ChatResponse { error: Some(message), .. }) => LineEvent::Error(ProviderError::Stream(message)),
        Ok(ChatResponse { message, done, .. }) => {
            let text = message.map(|m| m.content).unwrap_or_default();
            match (text.is_empty(), done) {
                (false, _) => LineEvent::Chunk(text),
                (true, true) => LineEvent::Done,
                (true, false) => LineEvent::Skip,
            }
        }
        Err(e) => LineEvent::Error(ProviderError::InvalidResponse(e.to_string())),
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, text), fields(provider = %self.id))]
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            prompt: text,
        };

        let response = self
            .http_client
            .post(self.url("/api/embeddings"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let parsed: EmbeddingResponse = check_response(response).await?.json().await?;
        if parsed.embedding.is_empty() {
            return Err(ProviderError::InvalidResponse("empty embedding".to_string()));
        }

        debug!(dimension = parsed.embedding.len(), "Received embedding");
        Ok(parsed.embedding)
    }

    #[instrument(skip(self, request), fields(provider = %self.id))]
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String> {
        let response = self
            .http_client
            .post(self.url("/api/chat"))
            .timeout(self.timeout)
            .json(&self.chat_body(request, false))
            .send()
            .await?;

        let parsed: ChatResponse = check_response(response).await?.json().await?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::InvalidResponse(error));
        }

        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no message".to_string()))
    }

    #[instrument(skip(self, request), fields(provider = %self.id))]
    async fn generate_stream(&self, request: &GenerationRequest) -> ProviderResult<ChunkStream> {
        let response = self
            .http_client
            .post(self.url("/api/chat"))
            .json(&self.chat_body(request, true))
            .send()
            .await?;

        let response = check_response(response).await?;
        Ok(decode_lines(response.bytes_stream(), parse_ollama_line))
    }

    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.url("/api/tags"))
            .timeout(self.timeout)
            .send()
            .await?;

        let parsed: TagList = check_response(response).await?.json().await?;
        Ok(parsed
            .models
            .into_iter()
            .map(|m| ModelInfo {
                provider: self.id.clone(),
                name: m.name,
            })
            .collect())
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let response = self
            .http_client
            .get(self.url("/api/tags"))
            .timeout(self.timeout)
            .send()
            .await?;
        check_response(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use futures::StreamExt;

    fn config(url: &str) -> ProviderConfig {
        ProviderConfig {
            id: "ollama".to_string(),
            kind: ProviderKind::Ollama,
            base_url: url.to_string(),
            api_key: None,
            embedding_model: "nomic-embed-text".to_string(),
            chat_model: "llama3".to_string(),
            priority: 2,
            timeout_secs: 5,
            enabled: true,
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: 0.3,
            max_tokens: 64,
        }
    }

    #[test]
    fn test_parse_ndjson_lines() {
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#),
            LineEvent::Chunk("Hi".to_string())
        );
        assert_eq!(
            parse_ollama_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
            LineEvent::Done
        );
        assert!(matches!(parse_ollama_line(r#"{"error":"model not found"}"#), LineEvent::Error(_)));
        assert_eq!(parse_ollama_line("   "), LineEvent::Skip);
    }

    #[tokio::test]
    async fn test_embed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"nomic-embed-text","prompt":"hello"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"embedding":[0.5,0.5]}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&config(&server.url())).unwrap();
        assert_eq!(provider.embed("hello").await.unwrap(), vec![0.5, 0.5]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_sends_options() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"stream":false,"options":{"num_predict":64}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"message":{"role":"assistant","content":"Hello"},"done":true}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&config(&server.url())).unwrap();
        assert_eq!(provider.generate(&request()).await.unwrap(), "Hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(
                "{\"message\":{\"content\":\"A\"},\"done\":false}\n\
                 {\"message\":{\"content\":\"B\"},\"done\":false}\n\
                 {\"message\":{\"content\":\"\"},\"done\":true}\n",
            )
            .create_async()
            .await;

        let provider = OllamaProvider::new(&config(&server.url())).unwrap();
        let chunks: Vec<String> = provider
            .generate_stream(&request())
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_health_check_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/api/tags").with_status(500).create_async().await;

        let provider = OllamaProvider::new(&config(&server.url())).unwrap();
        assert!(provider.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_list_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3:latest"}]}"#)
            .create_async()
            .await;

        let provider = OllamaProvider::new(&config(&server.url())).unwrap();
        let models = provider.list_models().await.unwrap();
        assert_eq!(models[0].name, "llama3:latest");
    }
}
