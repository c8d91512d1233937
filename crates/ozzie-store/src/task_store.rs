use crate::dirstore::Dirstore;
use crate::error::StoreError;
use crate::model::{Checkpoint, MailboxMessage, Task};

const CHECKPOINTS_FILE: &str = "checkpoints.jsonl";
const MAILBOX_FILE: &str = "mailbox.jsonl";

/// Task persistence atop [`Dirstore`], rooted at `<OzzieRoot>/tasks/`.
#[derive(Clone)]
pub struct TaskStore {
    dir: Dirstore,
}

impl TaskStore {
    pub fn new(ozzie_root: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: Dirstore::new(ozzie_root.into().join("tasks")) }
    }

    pub async fn create(&self, task: &Task) -> Result<(), StoreError> {
        self.dir.write_meta(&task.id, task).await
    }

    pub async fn get(&self, id: &str) -> Result<Task, StoreError> {
        self.dir.read_meta(id).await
    }

    pub async fn save(&self, task: &Task) -> Result<(), StoreError> {
        self.dir.write_meta(&task.id, task).await
    }

    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.dir.list_dirs().await
    }

    pub async fn write_output_md(&self, id: &str, content: &str) -> Result<(), StoreError> {
        self.dir.write_file(id, "output.md", content.as_bytes()).await
    }

    pub async fn read_output_md(&self, id: &str) -> Result<String, StoreError> {
        let bytes = self.dir.read_file(id, "output.md").await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn append_checkpoint(&self, id: &str, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.dir.append_jsonl(id, CHECKPOINTS_FILE, checkpoint).await
    }

    pub async fn checkpoints(&self, id: &str) -> Result<Vec<Checkpoint>, StoreError> {
        self.dir.load_jsonl(id, CHECKPOINTS_FILE).await
    }

    pub async fn append_mailbox(&self, id: &str, message: &MailboxMessage) -> Result<(), StoreError> {
        self.dir.append_jsonl(id, MAILBOX_FILE, message).await
    }

    pub async fn mailbox(&self, id: &str) -> Result<Vec<MailboxMessage>, StoreError> {
        self.dir.load_jsonl(id, MAILBOX_FILE).await
    }

    /// A task is waiting for a reply iff its mailbox has a `request` whose
    /// token no `response` references (§3).
    pub async fn is_waiting_for_reply(&self, id: &str) -> Result<bool, StoreError> {
        use crate::model::MailboxMessageType;
        let messages = self.mailbox(id).await?;
        let answered: std::collections::HashSet<&str> = messages
            .iter()
            .filter(|m| m.kind == MailboxMessageType::Response)
            .map(|m| m.token.as_str())
            .collect();
        Ok(messages
            .iter()
            .any(|m| m.kind == MailboxMessageType::Request && !answered.contains(m.token.as_str())))
    }
}
