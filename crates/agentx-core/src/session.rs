//! Session persistence seam.
//!
//! The engine only ever appends assembled messages and never reads back while
//! assembling, so the contract is deliberately narrow.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::Message;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()>;

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>>;
}

/// Process-local repository, mostly for tests and embedding.
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::UserMessage;

    #[tokio::test]
    async fn test_messages_are_kept_per_session_in_order() {
        let repo = InMemorySessionRepository::new();
        let first = Message::User(UserMessage::new("one"));
        let second = Message::User(UserMessage::new("two"));
        repo.add_message("s1", &first).await.unwrap();
        repo.add_message("s1", &second).await.unwrap();
        repo.add_message("s2", &first).await.unwrap();

        let s1 = repo.get_messages("s1").await.unwrap();
        assert_eq!(s1, vec![first.clone(), second]);
        assert_eq!(repo.get_messages("s2").await.unwrap().len(), 1);
        assert!(repo.get_messages("missing").await.unwrap().is_empty());
    }
}
