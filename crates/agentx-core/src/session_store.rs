//! JSONL-based session repository, one append-only file per session.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::session::SessionRepository;

/// File-based session repository.
///
/// Layout: `<base>/<session_id>.jsonl`, one serialized [`Message`] per line.
pub struct JsonlSessionRepository {
    base: PathBuf,
    // Serializes appends so concurrent agents never interleave partial lines.
    write_lock: Mutex<()>,
}

impl JsonlSessionRepository {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            write_lock: Mutex::new(()),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base.join(format!("{safe}.jsonl"))
    }
}

#[async_trait]
impl SessionRepository for JsonlSessionRepository {
    async fn add_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.base).await?;

        let path = self.session_path(session_id);
        let line = serde_json::to_string(message)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        debug!(session_id, message_id = message.id(), "Appended message");
        Ok(())
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line)
                .map_err(|e| Error::Session(format!("corrupt session line: {e}")))?;
            messages.push(message);
        }
        debug!(session_id, count = messages.len(), "Loaded session messages");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AssistantMessage, ContentPart, UserMessage};

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlSessionRepository::new(dir.path().to_path_buf());

        let user = Message::User(UserMessage::new("Hello"));
        let assistant = Message::Assistant(AssistantMessage {
            id: "msg_1".into(),
            content: vec![ContentPart::text("Hi there")],
            stop_reason: None,
            usage: None,
            timestamp: 42,
        });
        repo.add_message("sess-1", &user).await.unwrap();
        repo.add_message("sess-1", &assistant).await.unwrap();

        let loaded = repo.get_messages("sess-1").await.unwrap();
        assert_eq!(loaded, vec![user, assistant]);
    }

    #[tokio::test]
    async fn test_missing_session_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonlSessionRepository::new(dir.path().join("nested"));
        assert!(repo.get_messages("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_line_is_session_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.jsonl"), "{not json}\n")
            .await
            .unwrap();
        let repo = JsonlSessionRepository::new(dir.path().to_path_buf());
        let err = repo.get_messages("bad").await.unwrap_err();
        assert!(err.to_string().contains("corrupt session line"));
    }

    #[test]
    fn test_session_id_is_sanitized() {
        let repo = JsonlSessionRepository::new(PathBuf::from("/tmp/x"));
        let path = repo.session_path("../etc/passwd");
        assert_eq!(path, PathBuf::from("/tmp/x/___etc_passwd.jsonl"));
    }
}
