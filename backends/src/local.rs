use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use snapvault_core::storage::{Backend, BackendType, ObjectInfo};
use snapvault_core::{Error, Result};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Repository stored as plain files under a directory.
///
/// Objects are written to a hidden temporary file and renamed into place,
/// so a reader never observes a partially written packfile or state.
pub struct LocalBackend {
    base_path: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidParameter(format!(
                "invalid object key {:?}",
                path
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)?).await?)
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.full_path(path)?;
        let data = fs::read(&full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", path, e)))?;
        Ok(Bytes::from(data))
    }

    async fn read_range(&self, path: &str, offset: u64, length: u32) -> Result<Bytes> {
        let full_path = self.full_path(path)?;
        let mut file = fs::File::open(&full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to read {}: {}", path, e)))?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data).await.map_err(|e| {
            Error::Backend(format!(
                "Failed to read {} bytes at {} from {}: {}",
                length, offset, path, e
            ))
        })?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let full_path = self.full_path(path)?;
        let parent = full_path
            .parent()
            .ok_or_else(|| Error::InvalidParameter(format!("invalid object key {:?}", path)))?;
        fs::create_dir_all(parent).await?;

        let name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object");
        let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
        let tmp_path = parent.join(format!(".{}.tmp{:08x}", name, suffix));

        fs::write(&tmp_path, &data)
            .await
            .map_err(|e| Error::Backend(format!("Failed to write {}: {}", path, e)))?;
        if let Err(e) = fs::rename(&tmp_path, &full_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Backend(format!("Failed to write {}: {}", path, e)));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Backend(format!("Failed to delete {}: {}", path, e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let full_path = self.full_path(prefix)?;
        let mut results = Vec::new();

        if !fs::try_exists(&full_path).await? {
            return Ok(results);
        }
        let mut entries = fs::read_dir(&full_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // in-flight writes
                if name.starts_with('.') {
                    continue;
                }
                results.push(format!("{}/{}", prefix, name));
            }
        }
        results.sort();
        Ok(results)
    }

    async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let full_path = self.full_path(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| Error::Backend(format!("Failed to stat {}: {}", path, e)))?;

        let modified = metadata
            .modified()
            .map_err(|e| Error::Backend(format!("Failed to get modified time: {}", e)))?;
        let modified_dt: DateTime<Utc> = modified.into();

        Ok(ObjectInfo {
            path: path.to_string(),
            size: metadata.len(),
            modified: modified_dt,
        })
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn location(&self) -> String {
        format!("fs://{}", self.base_path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("repo"));
        (dir, backend)
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let (_dir, backend) = backend();
        backend.init().await.unwrap();

        backend
            .write("packfiles/bb", Bytes::from_static(b"second"))
            .await
            .unwrap();
        backend
            .write("packfiles/aa", Bytes::from_static(b"first"))
            .await
            .unwrap();
        backend
            .write("CONFIG", Bytes::from_static(b"config"))
            .await
            .unwrap();

        assert!(backend.exists("packfiles/aa").await.unwrap());
        assert!(!backend.exists("packfiles/cc").await.unwrap());
        assert_eq!(&backend.read("packfiles/aa").await.unwrap()[..], b"first");
        assert_eq!(
            backend.list("packfiles").await.unwrap(),
            vec!["packfiles/aa", "packfiles/bb"]
        );
        assert!(backend.list("states").await.unwrap().is_empty());
        assert_eq!(backend.stat("CONFIG").await.unwrap().size, 6);
        assert!(backend.location().starts_with("fs://"));
    }

    #[tokio::test]
    async fn test_read_range_seeks() {
        let (_dir, backend) = backend();
        backend
            .write("packfiles/p", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();

        assert_eq!(&backend.read_range("packfiles/p", 3, 4).await.unwrap()[..], b"3456");
        assert!(matches!(
            backend.read_range("packfiles/p", 8, 4).await,
            Err(Error::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let (_dir, backend) = backend();
        backend.write("states/s", Bytes::from_static(b"old")).await.unwrap();
        backend.write("states/s", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(&backend.read("states/s").await.unwrap()[..], b"new");
        assert_eq!(backend.list("states").await.unwrap(), vec!["states/s"]);

        backend.delete("states/s").await.unwrap();
        backend.delete("states/s").await.unwrap();
        assert!(!backend.exists("states/s").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, backend) = backend();
        for key in ["../outside", "/etc/passwd", "states/../../x", ""] {
            assert!(matches!(
                backend.write(key, Bytes::from_static(b"x")).await,
                Err(Error::InvalidParameter(_))
            ));
        }
    }
}
