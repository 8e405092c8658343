//! Storage backends.
//!
//! A backend is a flat key/value store of opaque objects. The repository
//! layout on top of it is:
//!
//! ```text
//! CONFIG                 # enveloped configuration
//! states/<mac>           # state fragments
//! packfiles/<mac>        # packfiles
//! ```

mod memory;

pub use memory::MemoryBackend;

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Local,
    Memory,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Reads `length` bytes at `offset`. Backends that can seek should
    /// override this; the default reads the whole object.
    async fn read_range(&self, path: &str, offset: u64, length: u32) -> Result<Bytes> {
        let data = self.read(path).await?;
        let start = offset as usize;
        let end = start + length as usize;
        if end > data.len() {
            return Err(Error::Backend(format!(
                "range {}..{} out of bounds for {} ({} bytes)",
                start,
                end,
                path,
                data.len()
            )));
        }
        Ok(data.slice(start..end))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists the objects directly under `prefix`, returned as `prefix/name`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn stat(&self, path: &str) -> Result<ObjectInfo>;

    fn backend_type(&self) -> BackendType;

    fn location(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path: String,
    pub size: u64,
    pub modified: chrono::DateTime<chrono::Utc>,
}
