//! In-memory conversation store backed by DashMap

use super::{Conversation, ConversationStore, ConversationSummary, ConversationTurn, MessagePreview, Page, Role};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ConversationRecord {
    conversation: Conversation,
    turns: Vec<ConversationTurn>,
}

impl ConversationRecord {
    fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            conversation: self.conversation.clone(),
            message_count: self.turns.len(),
            last_message: self.turns.last().map(MessagePreview::from_turn),
        }
    }
}

/// Conversation store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, ConversationRecord>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owned_count(&self, owner_id: &str) -> usize {
        self.conversations
            .iter()
            .filter(|entry| entry.conversation.owner_id == owner_id)
            .count()
    }

    fn not_found(conversation_id: &str) -> RagError {
        RagError::not_found("conversation", conversation_id)
    }

    /// Run `f` on a conversation owned by `owner_id`
    fn with_record<T>(&self, owner_id: &str, conversation_id: &str, f: impl FnOnce(&ConversationRecord) -> T) -> Result<T> {
        match self.conversations.get(conversation_id) {
            Some(record) if record.conversation.owner_id == owner_id => Ok(f(&record)),
            _ => Err(Self::not_found(conversation_id)),
        }
    }

    fn with_record_mut<T>(
        &self,
        owner_id: &str,
        conversation_id: &str,
        f: impl FnOnce(&mut ConversationRecord) -> T,
    ) -> Result<T> {
        match self.conversations.get_mut(conversation_id) {
            Some(mut record) if record.conversation.owner_id == owner_id => Ok(f(&mut record)),
            _ => Err(Self::not_found(conversation_id)),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, owner_id: &str, title: Option<String>) -> Result<Conversation> {
        let title = match title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            Some(title) => title,
            None => format!("Conversation {}", self.owned_count(owner_id) + 1),
        };

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title,
            created_at: now,
            updated_at: now,
        };

        self.conversations.insert(
            conversation.id.clone(),
            ConversationRecord {
                conversation: conversation.clone(),
                turns: Vec::new(),
            },
        );

        info!(conversation_id = %conversation.id, owner_id, "Created conversation");
        Ok(conversation)
    }

    async fn list_conversations(&self, owner_id: &str, page: usize, page_size: usize) -> Result<Page<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .filter(|entry| entry.conversation.owner_id == owner_id)
            .map(|entry| entry.summary())
            .collect();

        summaries.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });

        Ok(Page::paginate(summaries, page, page_size))
    }

    async fn get_conversation(&self, owner_id: &str, conversation_id: &str) -> Result<ConversationSummary> {
        self.with_record(owner_id, conversation_id, ConversationRecord::summary)
    }

    async fn update_title(&self, owner_id: &str, conversation_id: &str, title: String) -> Result<Conversation> {
        self.with_record_mut(owner_id, conversation_id, |record| {
            record.conversation.title = title;
            record.conversation.updated_at = Utc::now();
            record.conversation.clone()
        })
    }

    async fn delete_conversation(&self, owner_id: &str, conversation_id: &str) -> Result<()> {
        let removed = self
            .conversations
            .remove_if(conversation_id, |_, record| record.conversation.owner_id == owner_id);

        match removed {
            Some((_, record)) => {
                info!(conversation_id, turns = record.turns.len(), "Deleted conversation");
                Ok(())
            }
            None => Err(Self::not_found(conversation_id)),
        }
    }

    async fn append_turn(
        &self,
        owner_id: &str,
        conversation_id: &str,
        role: Role,
        content: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<ConversationTurn> {
        self.with_record_mut(owner_id, conversation_id, |record| {
            let turn = ConversationTurn {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                role,
                content,
                metadata,
                created_at: Utc::now(),
            };
            record.conversation.updated_at = turn.created_at;
            record.turns.push(turn.clone());
            debug!(conversation_id, role = %role, "Appended turn");
            turn
        })
    }

    async fn list_turns(&self, owner_id: &str, conversation_id: &str, page: usize, page_size: usize) -> Result<Page<ConversationTurn>> {
        let turns = self.with_record(owner_id, conversation_id, |record| record.turns.clone())?;
        Ok(Page::paginate(turns, page, page_size))
    }

    async fn recent_turns(&self, owner_id: &str, conversation_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>> {
        self.with_record(owner_id, conversation_id, |record| {
            let skip = record.turns.len().saturating_sub(max_turns);
            record.turns[skip..].to_vec()
        })
    }
}
