use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveChatEntry {
    pub chat_id: String,
    pub user_name: String,
    pub user_id: String,
    pub last_message_time: DateTime<Utc>,
    pub message_count: u64,
}

/// Chats seen since startup. Written by the poll loop only; everyone else
/// gets copies.
#[derive(Default)]
pub struct ChatRegistry {
    chats: RwLock<HashMap<String, ActiveChatEntry>>,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the entry for `chat_id`, returning its new message count.
    pub async fn record(&self, chat_id: &str, user_name: &str, user_id: &str) -> u64 {
        let mut chats = self.chats.write().await;
        let now = Utc::now();
        let entry = chats
            .entry(chat_id.to_string())
            .or_insert_with(|| ActiveChatEntry {
                chat_id: chat_id.to_string(),
                user_name: String::new(),
                user_id: String::new(),
                last_message_time: now,
                message_count: 0,
            });
        entry.user_name = user_name.to_string();
        entry.user_id = user_id.to_string();
        entry.last_message_time = now;
        entry.message_count += 1;
        entry.message_count
    }

    pub async fn snapshot(&self) -> HashMap<String, ActiveChatEntry> {
        self.chats.read().await.clone()
    }

    pub async fn contains(&self, chat_id: &str) -> bool {
        self.chats.read().await.contains_key(chat_id)
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_creates_then_updates() {
        let registry = ChatRegistry::new();
        assert_eq!(registry.record("c1", "Anna", "anna@corp").await, 1);
        let first = registry.snapshot().await["c1"].clone();

        assert_eq!(registry.record("c1", "Anna K", "anna@corp").await, 2);
        let second = registry.snapshot().await["c1"].clone();
        assert_eq!(second.user_name, "Anna K");
        assert_eq!(second.message_count, 2);
        assert!(second.last_message_time >= first.last_message_time);
    }

    #[tokio::test]
    async fn test_counts_are_per_chat() {
        let registry = ChatRegistry::new();
        for chat in ["a", "b", "a", "c", "a", "b"] {
            registry.record(chat, "", "").await;
        }
        let chats = registry.snapshot().await;
        assert_eq!(chats.len(), 3);
        assert_eq!(chats["a"].message_count, 3);
        assert_eq!(chats["b"].message_count, 2);
        assert_eq!(chats["c"].message_count, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = ChatRegistry::new();
        registry.record("c1", "", "").await;
        let snapshot = registry.snapshot().await;
        registry.record("c1", "", "").await;
        assert_eq!(snapshot["c1"].message_count, 1);
        assert!(registry.contains("c1").await);
        assert_eq!(registry.len().await, 1);
    }
}
