use crate::dirstore::Dirstore;
use crate::error::StoreError;
use crate::model::ScheduleEntry;

/// Schedule entry persistence atop [`Dirstore`], rooted at
/// `<OzzieRoot>/schedules/`.
#[derive(Clone)]
pub struct ScheduleStore {
    dir: Dirstore,
}

impl ScheduleStore {
    pub fn new(ozzie_root: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: Dirstore::new(ozzie_root.into().join("schedules")) }
    }

    pub async fn create(&self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        self.dir.write_meta(&entry.id, entry).await
    }

    pub async fn get(&self, id: &str) -> Result<ScheduleEntry, StoreError> {
        self.dir.read_meta(id).await
    }

    pub async fn save(&self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        self.dir.write_meta(&entry.id, entry).await
    }

    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.dir.remove_dir(id).await
    }

    pub async fn list(&self) -> Result<Vec<ScheduleEntry>, StoreError> {
        let ids = self.dir.list_dirs().await?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push(self.get(&id).await?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleSource;

    fn entry(id: &str) -> ScheduleEntry {
        ScheduleEntry {
            id: id.to_string(),
            source: ScheduleSource::Dynamic,
            session_id: None,
            title: "t".into(),
            description: "d".into(),
            cron_spec: None,
            interval_sec: Some(60),
            on_event: None,
            task_template: None,
            skill_name: None,
            cooldown_sec: 0,
            max_runs: None,
            run_count: 0,
            enabled: true,
            created_at: chrono::Utc::now(),
            last_run_at: None,
        }
    }

    #[tokio::test]
    async fn list_returns_all_created_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        store.create(&entry("sched_1")).await.unwrap();
        store.create(&entry("sched_2")).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        store.create(&entry("sched_1")).await.unwrap();
        store.remove("sched_1").await.unwrap();
        assert!(store.get("sched_1").await.is_err());
    }
}
