use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs4::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::error::StoreError;

/// Filesystem persistence primitive: one directory per id, an atomically
/// written `meta.json`, and append-only JSONL companion files alongside it.
///
/// Per-id access within this process is serialized through a
/// `tokio::sync::RwLock` so concurrent writers to the same id never
/// interleave, while unrelated ids proceed independently. `write_meta` also
/// takes an `fs4` advisory file lock around the write so a second process
/// sharing the same root (e.g. a CLI command run alongside the gateway)
/// can't race the rename.
#[derive(Clone)]
pub struct Dirstore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl Dirstore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn lock_for(&self, id: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn io_err(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io { path: path.display().to_string(), source }
    }

    pub async fn ensure_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.dir(id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| Self::io_err(&dir, e))?;
        Ok(dir)
    }

    /// Atomically overwrite `<id>/meta.json`: take the cross-process file
    /// lock, write to a sibling temp file in the same directory, then
    /// rename, so readers never observe a partial write.
    pub async fn write_meta<T: Serialize + Send + Sync>(
        &self,
        id: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let dir = self.dir(id);
        let body = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Decode { path: dir.display().to_string(), source: e })?;
        self.write_file(id, "meta.json", &body).await
    }

    /// Atomically overwrite an arbitrary `<id>/<filename>` companion, e.g. a
    /// plain-text `output.md`. Same lock-then-rename protocol as
    /// `write_meta`.
    pub async fn write_file(&self, id: &str, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.write().await;
        let dir = self.ensure_dir(id).await?;
        let filename = filename.to_string();
        let body = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let lock_path = dir.join(format!(".{filename}.lock"));
            let lock_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(&lock_path)
                .map_err(|e| Dirstore::io_err(&lock_path, e))?;
            lock_file.lock_exclusive().map_err(|e| Dirstore::io_err(&lock_path, e))?;

            let mut tmp = tempfile::NamedTempFile::new_in(&dir)
                .map_err(|e| Dirstore::io_err(&dir, e))?;
            tmp.write_all(&body).map_err(|e| Dirstore::io_err(&dir, e))?;
            tmp.flush().map_err(|e| Dirstore::io_err(&dir, e))?;
            let target_path = dir.join(&filename);
            tmp.persist(&target_path).map_err(|e| Dirstore::io_err(&target_path, e.error))?;

            FileExt::unlock(&lock_file).map_err(|e| Dirstore::io_err(&lock_path, e))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io {
            path: id.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })??;
        Ok(())
    }

    pub async fn read_file(&self, id: &str, filename: &str) -> Result<Vec<u8>, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.read().await;
        let path = self.dir(id).join(filename);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(format!("{id}/{filename}"))
            } else {
                Self::io_err(&path, e)
            }
        })
    }

    pub async fn read_meta<T: DeserializeOwned>(&self, id: &str) -> Result<T, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.read().await;
        let path = self.dir(id).join("meta.json");
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                Self::io_err(&path, e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Decode { path: path.display().to_string(), source: e })
    }

    /// Append one JSON-encoded record as a line to `<id>/<filename>`.
    pub async fn append_jsonl<T: Serialize + Send + Sync>(
        &self,
        id: &str,
        filename: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.write().await;
        let dir = self.ensure_dir(id).await?;
        let path = dir.join(filename);
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StoreError::Decode { path: path.display().to_string(), source: e })?;
        line.push(b'\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Self::io_err(&path, e))?;
        file.write_all(&line).await.map_err(|e| Self::io_err(&path, e))?;
        file.flush().await.map_err(|e| Self::io_err(&path, e))?;
        Ok(())
    }

    /// Reads every line, decoding each independently. A malformed line is
    /// logged and skipped rather than failing the whole load — a single
    /// truncated append (e.g. from a crash mid-write) must not take out the
    /// rest of a session's or task's history.
    pub async fn load_jsonl<T: DeserializeOwned>(
        &self,
        id: &str,
        filename: &str,
    ) -> Result<Vec<T>, StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.read().await;
        let path = self.dir(id).join(filename);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&path, e)),
        };
        let mut records = Vec::new();
        for (n, line) in std::str::from_utf8(&bytes).unwrap_or_default().lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping malformed jsonl line"
                ),
            }
        }
        Ok(records)
    }

    /// List every id with a directory under the store root.
    pub async fn list_dirs(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, StoreError> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut ids = Vec::new();
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| StoreError::Io {
                    path: root.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e),
                })?;
                if entry.file_type().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        ids.push(name.to_string());
                    }
                }
            }
            ids.sort();
            Ok(ids)
        })
        .await
        .map_err(|e| StoreError::Io {
            path: root.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?
    }

    pub async fn remove_dir(&self, id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(id);
        let _guard = lock.write().await;
        let dir = self.dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Demo {
        n: u32,
    }

    #[tokio::test]
    async fn write_then_read_meta_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        store.write_meta("abc", &Demo { n: 7 }).await.unwrap();
        let got: Demo = store.read_meta("abc").await.unwrap();
        assert_eq!(got, Demo { n: 7 });
    }

    #[tokio::test]
    async fn read_meta_missing_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        let err = store.read_meta::<Demo>("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn append_and_load_jsonl_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        store.append_jsonl("sess1", "messages.jsonl", &Demo { n: 1 }).await.unwrap();
        store.append_jsonl("sess1", "messages.jsonl", &Demo { n: 2 }).await.unwrap();
        let all: Vec<Demo> = store.load_jsonl("sess1", "messages.jsonl").await.unwrap();
        assert_eq!(all, vec![Demo { n: 1 }, Demo { n: 2 }]);
    }

    #[tokio::test]
    async fn load_jsonl_skips_malformed_lines_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        store.append_jsonl("sess1", "messages.jsonl", &Demo { n: 1 }).await.unwrap();
        store.write_file("sess1", "messages.jsonl", b"{\"n\":1}\nnot json\n{\"n\":2}\n").await.unwrap();
        let all: Vec<Demo> = store.load_jsonl("sess1", "messages.jsonl").await.unwrap();
        assert_eq!(all, vec![Demo { n: 1 }, Demo { n: 2 }]);
    }

    #[tokio::test]
    async fn list_dirs_reports_created_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        store.write_meta("a", &Demo { n: 1 }).await.unwrap();
        store.write_meta("b", &Demo { n: 2 }).await.unwrap();
        let mut ids = store.list_dirs().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn remove_dir_deletes_everything_for_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = Dirstore::new(dir.path());
        store.write_meta("gone", &Demo { n: 1 }).await.unwrap();
        store.remove_dir("gone").await.unwrap();
        assert!(store.read_meta::<Demo>("gone").await.is_err());
    }
}
