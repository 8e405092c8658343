//! Snapshots: a header plus the trees it points to.
//!
//! A snapshot opened with [`Snapshot::create`] is a write session: blobs go
//! into an in-memory packfile that is flushed whenever it fills up, and
//! their locations accumulate in a delta state. Nothing becomes visible in
//! the repository until [`Snapshot::commit`] stores the header and persists
//! the delta. A snapshot opened with [`Snapshot::load`] is read-only.

mod builder;
mod header;
mod store;
pub mod vfs;

pub use builder::{Builder, BTREE_INDEX_KIND, CONTENT_TYPE_INDEX};
pub use header::{Context, Header, Identity, Importer, Index, Source, Summary, VfsRoots};
pub use store::SnapshotStore;

use crate::btree::TreeRoot;
use crate::packfile::PackManager;
use crate::repository::Repository;
use crate::resources::ResourceType;
use crate::state::DeltaState;
use crate::{Error, Mac, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

struct Writer {
    packer: Mutex<PackManager>,
    delta: Mutex<DeltaState>,
    signing_key: Option<[u8; 32]>,
}

pub struct Snapshot {
    repository: Arc<Repository>,
    header: Header,
    writer: Option<Writer>,
}

impl Snapshot {
    pub async fn create(repository: Arc<Repository>) -> Result<Self> {
        let max_size = repository.configuration().packfile.max_size;
        let delta = repository.new_delta().await;
        let header = Header::new();
        repository.logger().trace(
            "snapshot",
            format_args!("{}: create, serial {}", header.short_id(), delta.serial()),
        );

        Ok(Self {
            repository,
            header,
            writer: Some(Writer {
                packer: Mutex::new(PackManager::new(max_size)),
                delta: Mutex::new(delta),
                signing_key: None,
            }),
        })
    }

    pub async fn load(repository: Arc<Repository>, id: &Mac) -> Result<Self> {
        if !repository.blob_exists(ResourceType::Snapshot, id).await {
            return Err(Error::SnapshotNotFound { id: id.to_string() });
        }
        let data = repository.get_blob(ResourceType::Snapshot, id).await?;
        let header = Header::from_bytes(&data)?;
        if header.identifier != *id {
            return Err(Error::Format(format!(
                "snapshot {} carries identifier {}",
                id, header.identifier
            )));
        }

        Ok(Self {
            repository,
            header,
            writer: None,
        })
    }

    pub fn id(&self) -> Mac {
        self.header.identifier
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn set_header(&mut self, header: Header) {
        self.header = header;
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn is_readonly(&self) -> bool {
        self.writer.is_none()
    }

    /// Signs the header at commit with a keyed hash under `key`.
    pub fn set_signing_key(&mut self, identity: uuid::Uuid, key: [u8; 32]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::ReadOnly)?;
        writer.signing_key = Some(key);
        self.header.identity.identifier = Some(identity);
        Ok(())
    }

    /// Checks the stored signature against `key`. Unsigned snapshots never verify.
    pub async fn verify_signature(&self, key: &[u8; 32]) -> Result<bool> {
        if self.header.identity.identifier.is_none() {
            return Ok(false);
        }
        let signature = self.get_blob(ResourceType::Signature, &self.id()).await?;
        let expected = blake3::keyed_hash(key, &self.header.to_bytes()?);
        Ok(signature.as_slice() == expected.as_bytes())
    }

    pub async fn get_blob(&self, resource: ResourceType, mac: &Mac) -> Result<Vec<u8>> {
        if let Some(writer) = &self.writer {
            if let Some(encoded) = writer.packer.lock().await.get_blob(resource, mac) {
                return self.repository.decode_buffer(&encoded);
            }
            let location = writer.delta.lock().await.get_location(resource, mac);
            if let Some(location) = location {
                let encoded = self.repository.get_packfile_blob(&location).await?;
                return self.repository.decode_buffer(&encoded);
            }
        }
        self.repository.get_blob(resource, mac).await
    }

    /// True if the repository or this session already holds the blob.
    pub async fn blob_exists(&self, resource: ResourceType, mac: &Mac) -> bool {
        if let Some(writer) = &self.writer {
            if writer.packer.lock().await.contains(resource, mac)
                || writer.delta.lock().await.blob_exists(resource, mac)
            {
                return true;
            }
        }
        self.repository.blob_exists(resource, mac).await
    }

    /// Stores a blob under `mac` unless it is already present.
    pub async fn put_blob(&self, resource: ResourceType, mac: Mac, data: &[u8]) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(Error::ReadOnly)?;
        if self.blob_exists(resource, &mac).await {
            return Ok(());
        }

        let encoded = self.repository.encode_buffer(data)?;
        let mut packer = writer.packer.lock().await;
        if let Some(pack) = packer.add_blob(resource, mac, &encoded) {
            let mut delta = writer.delta.lock().await;
            self.repository.flush_packfile(&pack, &mut delta).await?;
        }
        Ok(())
    }

    /// Stores `data` under its MAC and returns the MAC.
    pub async fn put_content(&self, resource: ResourceType, data: &[u8]) -> Result<Mac> {
        let mac = self.repository.compute_mac(data);
        self.put_blob(resource, mac, data).await?;
        Ok(mac)
    }

    pub async fn load_tree_root(&self, resource: ResourceType, mac: &Mac) -> Result<TreeRoot> {
        TreeRoot::from_bytes(&self.get_blob(resource, mac).await?)
    }

    pub async fn put_tree_root(&self, resource: ResourceType, root: &TreeRoot) -> Result<Mac> {
        self.put_content(resource, &root.to_bytes()?).await
    }

    /// Stores the header, flushes pending blobs and persists the delta.
    /// Returns the snapshot identifier.
    pub async fn commit(self) -> Result<Mac> {
        let start = Instant::now();
        let id = self.id();
        let header = self.header.to_bytes()?;
        let signing_key = self
            .writer
            .as_ref()
            .ok_or(Error::ReadOnly)?
            .signing_key;

        if let Some(key) = signing_key {
            let signature = blake3::keyed_hash(&key, &header);
            self.put_blob(ResourceType::Signature, id, signature.as_bytes())
                .await?;
        }
        self.put_blob(ResourceType::Snapshot, id, &header).await?;

        let Some(writer) = self.writer else {
            return Err(Error::ReadOnly);
        };
        let mut delta = writer.delta.into_inner();
        if let Some(pack) = writer.packer.into_inner().finish_current_pack() {
            self.repository.flush_packfile(&pack, &mut delta).await?;
        }
        self.repository.commit_delta(delta).await?;

        self.repository.logger().trace(
            "snapshot",
            format_args!("{}: commit {:?}", id.short_string(), start.elapsed()),
        );
        Ok(id)
    }
}
