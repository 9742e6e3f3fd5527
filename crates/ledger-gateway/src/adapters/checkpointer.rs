//! Checkpointer Adapters
//!
//! Implements the `Checkpointer` port in memory and as one JSON file per
//! (channel, listener).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{Checkpoint, GatewayError, GatewayResult};
use crate::ports::outbound::Checkpointer;

/// Process-local checkpoints. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    checkpoints: Mutex<HashMap<(String, String), Checkpoint>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(&self, channel: &str, listener: &str) -> GatewayResult<Option<Checkpoint>> {
        let key = (channel.to_string(), listener.to_string());
        Ok(self.checkpoints.lock().get(&key).cloned())
    }

    async fn save(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<()> {
        let key = (channel.to_string(), listener.to_string());
        let mut checkpoints = self.checkpoints.lock();
        checkpoints
            .entry(key)
            .or_insert_with(|| Checkpoint::empty(channel, listener))
            .record(block_number, transaction_id);
        Ok(())
    }

    async fn check(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<bool> {
        let key = (channel.to_string(), listener.to_string());
        Ok(self
            .checkpoints
            .lock()
            .get(&key)
            .is_some_and(|cp| cp.covers(block_number, transaction_id)))
    }
}

/// Checkpoints persisted as JSON files under a directory.
pub struct FileCheckpointer {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointer {
    /// Store checkpoints under `dir`, creating it if needed.
    pub async fn new(dir: impl AsRef<Path>) -> GatewayResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::Checkpoint(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn path_for(&self, channel: &str, listener: &str) -> PathBuf {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect::<String>()
        };
        self.dir
            .join(format!("{}.{}.json", sanitize(channel), sanitize(listener)))
    }

    async fn read(&self, path: &Path) -> GatewayResult<Option<Checkpoint>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| GatewayError::Checkpoint(format!("decode {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::Checkpoint(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn load(&self, channel: &str, listener: &str) -> GatewayResult<Option<Checkpoint>> {
        self.read(&self.path_for(channel, listener)).await
    }

    async fn save(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(channel, listener);
        let mut checkpoint = self
            .read(&path)
            .await?
            .unwrap_or_else(|| Checkpoint::empty(channel, listener));
        checkpoint.record(block_number, transaction_id);

        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| GatewayError::Checkpoint(format!("encode: {e}")))?;
        // Write-then-rename; readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| GatewayError::Checkpoint(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| GatewayError::Checkpoint(format!("rename {}: {e}", path.display())))?;

        debug!(
            channel,
            listener, block_number, ?transaction_id, "[gateway] Checkpoint saved"
        );
        Ok(())
    }

    async fn check(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<bool> {
        Ok(self
            .load(channel, listener)
            .await?
            .is_some_and(|cp| cp.covers(block_number, transaction_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_load_absent() {
        let cp = InMemoryCheckpointer::new();
        assert!(cp.load("ch", "l").await.unwrap().is_none());
        assert!(!cp.check("ch", "l", 0, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_save_and_check() {
        let cp = InMemoryCheckpointer::new();
        cp.save("ch", "l", 5, Some("tx1")).await.unwrap();
        assert!(cp.check("ch", "l", 5, Some("tx1")).await.unwrap());
        assert!(!cp.check("ch", "l", 5, Some("tx2")).await.unwrap());

        cp.save("ch", "l", 5, None).await.unwrap();
        let loaded = cp.load("ch", "l").await.unwrap().unwrap();
        assert_eq!(loaded.resume_block(), 6);
        // Other listeners are independent
        assert!(cp.load("ch", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_checkpointer_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cp = FileCheckpointer::new(dir.path()).await.unwrap();
            cp.save("mychannel", "listener/1", 9, Some("txA")).await.unwrap();
        }

        let cp = FileCheckpointer::new(dir.path()).await.unwrap();
        let loaded = cp.load("mychannel", "listener/1").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 9);
        assert_eq!(loaded.transaction_id.as_deref(), Some("txA"));
        assert!(!loaded.block_complete);
        assert!(cp.check("mychannel", "listener/1", 9, Some("txA")).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_checkpointer_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::new(dir.path()).await.unwrap();
        tokio::fs::write(cp.path_for("ch", "l"), b"not json")
            .await
            .unwrap();
        assert!(matches!(
            cp.load("ch", "l").await,
            Err(GatewayError::Checkpoint(_))
        ));
    }
}
