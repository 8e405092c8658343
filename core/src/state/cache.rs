use crate::{Error, Mac, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Local copy of decoded state fragments. Holding a fragment here only saves
/// a fetch on the next rebuild; it never decides what the state contains.
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get_states(&self) -> Result<Vec<Mac>>;

    async fn get_state(&self, id: &Mac) -> Result<Vec<u8>>;

    async fn put_state(&self, id: &Mac, data: &[u8]) -> Result<()>;

    async fn del_state(&self, id: &Mac) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCache {
    states: RwLock<BTreeMap<Mac, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateCache for MemoryCache {
    async fn get_states(&self) -> Result<Vec<Mac>> {
        Ok(self.states.read().await.keys().copied().collect())
    }

    async fn get_state(&self, id: &Mac) -> Result<Vec<u8>> {
        self.states
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::BlobNotFound {
                resource: "state".to_string(),
                mac: id.to_string(),
            })
    }

    async fn put_state(&self, id: &Mac, data: &[u8]) -> Result<()> {
        self.states.write().await.insert(*id, data.to_vec());
        Ok(())
    }

    async fn del_state(&self, id: &Mac) -> Result<()> {
        self.states.write().await.remove(id);
        Ok(())
    }
}

/// One file per fragment, named by its hex identifier.
pub struct DiskCache {
    path: PathBuf,
}

impl DiskCache {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state_path(&self, id: &Mac) -> PathBuf {
        self.path.join(id.to_hex())
    }
}

#[async_trait]
impl StateCache for DiskCache {
    async fn get_states(&self) -> Result<Vec<Mac>> {
        let mut states = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            // Leftover temporaries and foreign files are ignored.
            if let Some(id) = name.to_str().and_then(|name| name.parse::<Mac>().ok()) {
                states.push(id);
            }
        }
        states.sort();
        Ok(states)
    }

    async fn get_state(&self, id: &Mac) -> Result<Vec<u8>> {
        match fs::read(self.state_path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::BlobNotFound {
                resource: "state".to_string(),
                mac: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_state(&self, id: &Mac, data: &[u8]) -> Result<()> {
        let target = self.state_path(id);
        let temp = self.path.join(format!("{}.tmp", id.to_hex()));
        fs::write(&temp, data).await?;
        fs::rename(&temp, &target).await?;
        Ok(())
    }

    async fn del_state(&self, id: &Mac) -> Result<()> {
        match fs::remove_file(self.state_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
