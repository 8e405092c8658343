use super::{Backend, BackendType, ObjectInfo};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Process-local backend, used by tests and scratch repositories.
pub struct MemoryBackend {
    name: String,
    objects: RwLock<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of read / read_range calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn object_count(&self, prefix: &str) -> usize {
        self.objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| Error::Backend(format!("Failed to read {}: not found", path)))
    }

    async fn read_range(&self, path: &str, offset: u64, length: u32) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().await;
        let (data, _) = objects
            .get(path)
            .ok_or_else(|| Error::Backend(format!("Failed to read {}: not found", path)))?;
        let start = offset as usize;
        let end = start + length as usize;
        if end > data.len() {
            return Err(Error::Backend(format!(
                "range {}..{} out of bounds for {}",
                start, end, path
            )));
        }
        Ok(data.slice(start..end))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.objects
            .write()
            .await
            .insert(path.to_string(), (data, Utc::now()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().await.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(&dir) && !key[dir.len()..].contains('/'))
            .cloned()
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let objects = self.objects.read().await;
        let (data, modified) = objects
            .get(path)
            .ok_or_else(|| Error::Backend(format!("Failed to stat {}: not found", path)))?;
        Ok(ObjectInfo {
            path: path.to_string(),
            size: data.len() as u64,
            modified: *modified,
        })
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn location(&self) -> String {
        format!("memory://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_list() {
        let backend = MemoryBackend::new("test");
        backend.write("states/aa", Bytes::from_static(b"one")).await.unwrap();
        backend.write("states/bb", Bytes::from_static(b"two")).await.unwrap();
        backend.write("packfiles/cc", Bytes::from_static(b"three")).await.unwrap();

        assert!(backend.exists("states/aa").await.unwrap());
        assert_eq!(backend.read("states/bb").await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(
            backend.read_range("packfiles/cc", 1, 3).await.unwrap(),
            Bytes::from_static(b"hre")
        );
        assert!(backend.read_range("packfiles/cc", 3, 10).await.is_err());

        let mut states = backend.list("states").await.unwrap();
        states.sort();
        assert_eq!(states, vec!["states/aa".to_string(), "states/bb".to_string()]);
        assert_eq!(backend.stat("packfiles/cc").await.unwrap().size, 5);

        backend.delete("states/aa").await.unwrap();
        assert!(!backend.exists("states/aa").await.unwrap());
        assert_eq!(backend.read_count(), 3);
        assert_eq!(backend.write_count(), 3);
    }
}
