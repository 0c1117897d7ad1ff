//! Multi-turn conversation context storage

pub mod memory;

pub use memory::InMemoryConversationStore;

use crate::error::Result;
use crate::middleware::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of characters kept in a last-message preview
pub const PREVIEW_CHARS: usize = 100;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ValidationError::InvalidRole(other.to_string())),
        }
    }
}

/// A conversation owned by a single caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single message in a conversation; turns are never edited
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Free-form metadata, e.g. the citations of an assistant answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Preview of the newest turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePreview {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessagePreview {
    pub fn from_turn(turn: &ConversationTurn) -> Self {
        let content = match turn.content.char_indices().nth(PREVIEW_CHARS) {
            Some((cut, _)) => format!("{}...", &turn.content[..cut]),
            None => turn.content.clone(),
        };
        Self {
            role: turn.role,
            content,
            created_at: turn.created_at,
        }
    }
}

/// Conversation listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
}

/// One page of a listing; pages are 1-based
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slice a full, already ordered listing
    pub fn paginate(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let total = all.len();
        let page = page.max(1);
        let page_size = page_size.max(1);
        let items = all.into_iter().skip((page - 1).saturating_mul(page_size)).take(page_size).collect();

        Self {
            items,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        }
    }
}

/// Persistence for conversations and their turns
///
/// Every operation is scoped by owner; touching a conversation owned by
/// someone else behaves as if it did not exist.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation; without a title it becomes "Conversation N"
    async fn create_conversation(&self, owner_id: &str, title: Option<String>) -> Result<Conversation>;

    /// Conversations ordered by most recent activity
    async fn list_conversations(&self, owner_id: &str, page: usize, page_size: usize) -> Result<Page<ConversationSummary>>;

    async fn get_conversation(&self, owner_id: &str, conversation_id: &str) -> Result<ConversationSummary>;

    async fn update_title(&self, owner_id: &str, conversation_id: &str, title: String) -> Result<Conversation>;

    /// Delete a conversation together with all of its turns
    async fn delete_conversation(&self, owner_id: &str, conversation_id: &str) -> Result<()>;

    /// Append a turn and bump the conversation's `updated_at`
    async fn append_turn(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        content: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<ConversationTurn>;

    /// Turns oldest first
    async fn list_turns(&self, owner_id: &str, conversation_id: &str, page: usize, page_size: usize) -> Result<Page<ConversationTurn>>;

    /// The newest `max_turns` turns, returned oldest first
    async fn recent_turns(&self, owner_id: &str, conversation_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_paginate() {
        let page = Page::paginate((1..=7).collect::<Vec<_>>(), 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);

        let beyond = Page::paginate((1..=7).collect::<Vec<_>>(), 5, 3);
        assert!(beyond.items.is_empty());
    }

    #[test]
    fn test_paginate_huge_page_is_empty() {
        let page = Page::paginate(vec![1, 2, 3], usize::MAX, 20);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.page, usize::MAX);
    }

    #[test]
    fn test_preview_truncates_long_content() {
        let turn = ConversationTurn {
            id: "t".to_string(),
            conversation_id: "c".to_string(),
            role: Role::User,
            content: "é".repeat(150),
            metadata: None,
            created_at: Utc::now(),
        };
        let preview = MessagePreview::from_turn(&turn);
        assert_eq!(preview.content.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.content.ends_with("..."));
    }
}
