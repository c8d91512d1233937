use crate::dirstore::Dirstore;
use crate::error::StoreError;
use crate::model::{Session, SessionStatus, StoredMessage};

const TRANSCRIPT_FILE: &str = "messages.jsonl";

/// Session persistence atop [`Dirstore`], rooted at `<OzzieRoot>/sessions/`.
#[derive(Clone)]
pub struct SessionStore {
    dir: Dirstore,
}

impl SessionStore {
    pub fn new(ozzie_root: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: Dirstore::new(ozzie_root.into().join("sessions")) }
    }

    pub async fn create(&self, id: impl Into<String>) -> Result<Session, StoreError> {
        let session = Session::new(id);
        self.dir.write_meta(&session.id, &session).await?;
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Session, StoreError> {
        self.dir.read_meta(id).await
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.dir.write_meta(&session.id, session).await
    }

    pub async fn append_message(&self, id: &str, message: &StoredMessage) -> Result<(), StoreError> {
        self.dir.append_jsonl(id, TRANSCRIPT_FILE, message).await?;
        let mut session = self.get(id).await?;
        session.message_count += 1;
        session.updated_at = chrono::Utc::now();
        self.save(&session).await
    }

    pub async fn messages(&self, id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        self.dir.load_jsonl(id, TRANSCRIPT_FILE).await
    }

    pub async fn close(&self, id: &str) -> Result<(), StoreError> {
        let mut session = self.get(id).await?;
        session.status = SessionStatus::Closed;
        session.updated_at = chrono::Utc::now();
        self.save(&session).await
    }

    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.dir.list_dirs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;

    #[tokio::test]
    async fn create_then_append_messages_updates_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("sess_1").await.unwrap();

        store
            .append_message(
                "sess_1",
                &StoredMessage {
                    role: MessageRole::User,
                    content: "hi".into(),
                    ts: chrono::Utc::now(),
                    tool_calls: vec![],
                    tool_call_id: None,
                    tokens_in: None,
                    tokens_out: None,
                },
            )
            .await
            .unwrap();

        let session = store.get("sess_1").await.unwrap();
        assert_eq!(session.message_count, 1);
        let messages = store.messages("sess_1").await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn close_marks_session_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.create("sess_2").await.unwrap();
        store.close("sess_2").await.unwrap();
        let session = store.get("sess_2").await.unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
    }
}
