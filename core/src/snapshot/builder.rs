use super::header::{Header, Importer, Index, Source, Summary, VfsRoots};
use super::store::SnapshotStore;
use super::vfs::{Entry, ErrorItem, FileKind, Xattr, XattrKind};
use super::Snapshot;
use crate::btree::{BTree, DEFAULT_ORDER};
use crate::chunker::Chunker;
use crate::objects::{self, Chunk, Object};
use crate::repository::Repository;
use crate::resources::ResourceType;
use crate::{Mac, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const CONTENT_TYPE_INDEX: &str = "content-type";
pub const BTREE_INDEX_KIND: &str = "btree";

/// Produces one snapshot from a stream of filesystem records.
///
/// Content is chunked and stored as it arrives; the trees are built and the
/// header is written by [`Builder::commit`].
pub struct Builder {
    snapshot: Snapshot,
    chunker: Chunker,
    importer: Importer,
    entries: Vec<(String, Mac)>,
    errors: Vec<(String, Mac)>,
    xattrs: Vec<(String, Mac)>,
    content_types: Vec<(String, Mac)>,
    summary: Summary,
    started: Instant,
}

impl Builder {
    pub async fn new(repository: Arc<Repository>, importer: Importer) -> Result<Self> {
        let chunker = Chunker::from_config(&repository.configuration().chunking);
        Ok(Self {
            snapshot: Snapshot::create(repository).await?,
            chunker,
            importer,
            entries: Vec::new(),
            errors: Vec::new(),
            xattrs: Vec::new(),
            content_types: Vec::new(),
            summary: Summary::default(),
            started: Instant::now(),
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn header_mut(&mut self) -> &mut Header {
        self.snapshot.header_mut()
    }

    /// Signs the header at commit under `key`.
    pub fn set_signing_key(&mut self, identity: uuid::Uuid, key: [u8; 32]) -> Result<()> {
        self.snapshot.set_signing_key(identity, key)
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    /// Stores `data` as chunks plus an object and records a file entry.
    pub async fn add_file(
        &mut self,
        path: &str,
        data: &[u8],
        mode: u32,
        modified: Option<DateTime<Utc>>,
    ) -> Result<Entry> {
        let object_mac = self.store_object(data).await?;
        let content_type = objects::detect_content_type(data);

        let entry = Entry {
            path: path.to_string(),
            kind: FileKind::File,
            size: data.len() as u64,
            mode,
            modified,
            symlink_target: None,
            object: Some(object_mac),
        };
        let entry_mac = self.put_entry(&entry).await?;
        self.content_types
            .push((format!("{}:{}", content_type, path), entry_mac));
        self.summary.files += 1;
        self.summary.size += entry.size;
        Ok(entry)
    }

    pub async fn add_directory(
        &mut self,
        path: &str,
        mode: u32,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let entry = Entry {
            path: path.to_string(),
            kind: FileKind::Directory,
            size: 0,
            mode,
            modified,
            symlink_target: None,
            object: None,
        };
        self.put_entry(&entry).await?;
        self.summary.directories += 1;
        Ok(())
    }

    pub async fn add_symlink(&mut self, path: &str, target: &str) -> Result<()> {
        let entry = Entry {
            path: path.to_string(),
            kind: FileKind::Symlink,
            size: 0,
            mode: 0o777,
            modified: None,
            symlink_target: Some(target.to_string()),
            object: None,
        };
        self.put_entry(&entry).await?;
        Ok(())
    }

    /// Records a path that could not be read.
    pub async fn add_error(&mut self, path: &str, message: &str) -> Result<()> {
        let item = ErrorItem {
            path: path.to_string(),
            message: message.to_string(),
        };
        let mac = self
            .snapshot
            .put_content(ResourceType::ErrorEntry, &item.to_bytes()?)
            .await?;
        self.errors.push((item.path, mac));
        self.summary.errors += 1;
        Ok(())
    }

    /// Records an extended attribute; its value is stored like file content.
    pub async fn add_xattr(
        &mut self,
        path: &str,
        name: &str,
        kind: XattrKind,
        value: &[u8],
    ) -> Result<()> {
        let object = if value.is_empty() {
            None
        } else {
            Some(self.store_object(value).await?)
        };
        let xattr = Xattr {
            path: path.to_string(),
            name: name.to_string(),
            kind,
            size: value.len() as u64,
            object,
        };
        let mac = self
            .snapshot
            .put_content(ResourceType::XattrEntry, &xattr.to_bytes()?)
            .await?;
        self.xattrs.push((xattr.key(), mac));
        Ok(())
    }

    async fn put_entry(&mut self, entry: &Entry) -> Result<Mac> {
        let mac = self
            .snapshot
            .put_content(ResourceType::VfsEntry, &entry.to_bytes()?)
            .await?;
        self.entries.push((entry.path.clone(), mac));
        Ok(mac)
    }

    async fn store_object(&self, data: &[u8]) -> Result<Mac> {
        let repository = self.snapshot.repository();
        let mut object = Object::new(
            repository.compute_mac(data),
            objects::detect_content_type(data),
        );
        object.entropy = objects::entropy(data);

        for piece in self.chunker.chunk_data(data) {
            let mac = self
                .snapshot
                .put_content(ResourceType::Chunk, piece.data)
                .await?;
            object.chunks.push(Chunk {
                mac,
                length: piece.len() as u32,
                entropy: objects::entropy(piece.data),
            });
        }

        self.snapshot
            .put_blob(ResourceType::Object, object.mac, &object.to_bytes()?)
            .await?;
        Ok(object.mac)
    }

    async fn build_tree(
        &self,
        root_type: ResourceType,
        node_type: ResourceType,
        items: Vec<(String, Mac)>,
    ) -> Result<Mac> {
        let store = SnapshotStore::<String, Mac>::new(&self.snapshot, node_type);
        let tree = BTree::build(&store, DEFAULT_ORDER, items).await?;
        self.snapshot.put_tree_root(root_type, &tree.root()).await
    }

    /// Builds the trees, writes the header and commits the snapshot.
    pub async fn commit(mut self) -> Result<Mac> {
        let entries = std::mem::take(&mut self.entries);
        let errors = std::mem::take(&mut self.errors);
        let xattrs = std::mem::take(&mut self.xattrs);
        let content_types = std::mem::take(&mut self.content_types);

        let vfs = VfsRoots {
            root: self
                .build_tree(ResourceType::VfsBtree, ResourceType::VfsNode, entries)
                .await?,
            errors: self
                .build_tree(ResourceType::ErrorBtree, ResourceType::ErrorNode, errors)
                .await?,
            xattrs: self
                .build_tree(ResourceType::XattrBtree, ResourceType::XattrNode, xattrs)
                .await?,
        };
        let index = self
            .build_tree(ResourceType::BtreeRoot, ResourceType::BtreeNode, content_types)
            .await?;

        let summary = self.summary;
        let importer = self.importer.clone();
        let elapsed = self.started.elapsed();
        let header = self.snapshot.header_mut();
        header.duration_ms = elapsed.as_millis() as u64;
        header.sources.push(Source {
            importer,
            vfs,
            indexes: vec![Index {
                name: CONTENT_TYPE_INDEX.to_string(),
                kind: BTREE_INDEX_KIND.to_string(),
                value: index,
            }],
            summary,
        });

        debug!(
            snapshot = %self.snapshot.id().short_string(),
            files = summary.files,
            directories = summary.directories,
            errors = summary.errors,
            "Committing snapshot"
        );
        self.snapshot.commit().await
    }
}
