//! Data models shared by all AI providers

use serde::{Deserialize, Serialize};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message sent to a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Provider-independent generation request
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Caller-facing generation options
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Pin the call to one provider and disable failover
    pub provider: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            provider: None,
        }
    }
}

impl GenerationOptions {
    pub fn request(&self, messages: Vec<ChatMessage>) -> GenerationRequest {
        GenerationRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Result of a call routed through the service manager
#[derive(Debug, Clone)]
pub struct Invocation<T> {
    pub value: T,
    /// Provider that produced the value
    pub provider: String,
    /// Attempts that failed before the successful one
    pub failed_attempts: u32,
}

/// Model advertised by a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub provider: String,
    pub name: String,
}
