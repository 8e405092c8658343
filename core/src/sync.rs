//! Snapshot replication between two repositories.
//!
//! Every blob goes through [`push`], which checks the destination first and
//! only reads the source when the blob is missing. A snapshot is walked tree
//! by tree and committed at the destination once every blob it references
//! has been pushed, so a listed destination snapshot never has dangling
//! references.

use crate::btree::{BTree, TreeRoot};
use crate::logging::Logger;
use crate::objects::Object;
use crate::params;
use crate::repository::Repository;
use crate::resources::ResourceType;
use crate::snapshot::vfs::{Entry, Xattr};
use crate::snapshot::{Snapshot, SnapshotStore, Source, BTREE_INDEX_KIND, CONTENT_TYPE_INDEX};
use crate::{Error, Mac, Result};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local to peer.
    To,
    /// Peer to local.
    From,
    Both,
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "to" => Ok(Direction::To),
            "from" => Ok(Direction::From),
            "both" | "with" => Ok(Direction::Both),
            other => Err(Error::InvalidParameter(format!(
                "sync direction must be to, from or both, got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::To => "to",
            Direction::From => "from",
            Direction::Both => "both",
        })
    }
}

/// Outcome of one [`push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pushed {
    /// The destination already had the blob; nothing was read or written.
    Found,
    /// The blob was copied; carries its plaintext.
    Pushed(Vec<u8>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionReport {
    pub synced: usize,
    pub failed: usize,
    /// Candidates the destination had deleted.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub to_peer: DirectionReport,
    pub from_peer: DirectionReport,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.to_peer.failed == 0 && self.from_peer.failed == 0
    }

    pub fn synced(&self) -> usize {
        self.to_peer.synced + self.from_peer.synced
    }
}

/// Resource types making up one kind of tree.
#[derive(Debug, Clone, Copy)]
struct TreeKind {
    root: ResourceType,
    node: ResourceType,
    entry: Option<ResourceType>,
}

const VFS_TREE: TreeKind = TreeKind {
    root: ResourceType::VfsBtree,
    node: ResourceType::VfsNode,
    entry: Some(ResourceType::VfsEntry),
};

const ERROR_TREE: TreeKind = TreeKind {
    root: ResourceType::ErrorBtree,
    node: ResourceType::ErrorNode,
    entry: Some(ResourceType::ErrorEntry),
};

const XATTR_TREE: TreeKind = TreeKind {
    root: ResourceType::XattrBtree,
    node: ResourceType::XattrNode,
    entry: Some(ResourceType::XattrEntry),
};

const INDEX_TREE: TreeKind = TreeKind {
    root: ResourceType::BtreeRoot,
    node: ResourceType::BtreeNode,
    entry: None,
};

pub struct SyncEngine {
    local: Arc<Repository>,
    peer: Arc<Repository>,
    logger: Logger,
}

impl SyncEngine {
    pub fn new(local: Arc<Repository>, peer: Arc<Repository>, logger: Logger) -> Self {
        Self {
            local,
            peer,
            logger,
        }
    }

    /// Replicates the snapshots one side lacks. With `Direction::Both` the
    /// two directions run concurrently, each against the listings taken
    /// before either started.
    pub async fn run(&self, direction: Direction, prefix: Option<&str>) -> Result<SyncReport> {
        let prefix = prefix.unwrap_or("");
        let local_snapshots = self.local.get_snapshots().await;
        let peer_snapshots = self.peer.get_snapshots().await;

        let to_peer = candidates(&local_snapshots, &peer_snapshots, prefix);
        let from_peer = candidates(&peer_snapshots, &local_snapshots, prefix);

        let mut report = SyncReport::default();
        match direction {
            Direction::To => {
                report.to_peer = self.sync_snapshots(&self.local, &self.peer, to_peer).await?;
            }
            Direction::From => {
                report.from_peer = self.sync_snapshots(&self.peer, &self.local, from_peer).await?;
            }
            Direction::Both => {
                let (to, from) = tokio::join!(
                    self.sync_snapshots(&self.local, &self.peer, to_peer),
                    self.sync_snapshots(&self.peer, &self.local, from_peer),
                );
                report.to_peer = to?;
                report.from_peer = from?;
            }
        }

        self.logger.info(format_args!(
            "sync {} {}: {} synced, {} failed",
            direction,
            self.peer.location(),
            report.synced(),
            report.to_peer.failed + report.from_peer.failed
        ));
        Ok(report)
    }

    /// Synchronizes each candidate in turn. Per-snapshot errors are logged and
    /// counted; fatal ones abort the batch.
    pub async fn sync_snapshots(
        &self,
        src: &Arc<Repository>,
        dst: &Arc<Repository>,
        candidates: Vec<Mac>,
    ) -> Result<DirectionReport> {
        let mut report = DirectionReport::default();
        for id in candidates {
            if dst.has_deleted_resource(ResourceType::Snapshot, &id).await {
                self.logger.info(format_args!(
                    "skipping snapshot {}: deleted at {}",
                    id.short_string(),
                    dst.location()
                ));
                report.skipped += 1;
                continue;
            }

            match sync_snapshot(src, dst, &id).await {
                Ok(_) => {
                    self.logger.info(format_args!(
                        "synchronized snapshot {} from {} to {}",
                        id.short_string(),
                        src.location(),
                        dst.location()
                    ));
                    report.synced += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.logger.error(format_args!(
                        "failed to synchronize snapshot {} from {}: {}",
                        id.short_string(),
                        src.location(),
                        e
                    ));
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// Source snapshots matching `prefix` that the destination does not list.
pub fn candidates(src: &[Mac], dst: &[Mac], prefix: &str) -> Vec<Mac> {
    let known: HashSet<&Mac> = dst.iter().collect();
    src.iter()
        .filter(|id| params::matches_prefix(id, prefix) && !known.contains(id))
        .copied()
        .collect()
}

/// Copies one snapshot and everything it references, then commits it at
/// `dst` under the source header.
pub async fn sync_snapshot(src: &Arc<Repository>, dst: &Arc<Repository>, id: &Mac) -> Result<Mac> {
    let start = Instant::now();
    let source = Snapshot::load(src.clone(), id).await?;
    let mut target = Snapshot::create(dst.clone()).await?;
    target.set_header(source.header().clone());

    if source.header().identity.identifier.is_some() {
        push(&source, &target, ResourceType::Signature, *id, None).await?;
    }

    for origin in &source.header().sources {
        sync_source(&source, &target, origin).await?;
    }

    let committed = target.commit().await?;
    dst.logger().trace(
        "sync",
        format_args!("snapshot {}: {:?}", id.short_string(), start.elapsed()),
    );
    Ok(committed)
}

async fn sync_source(source: &Snapshot, target: &Snapshot, origin: &Source) -> Result<()> {
    sync_tree(source, target, VFS_TREE, origin.vfs.root).await?;
    sync_tree(source, target, ERROR_TREE, origin.vfs.errors).await?;
    sync_tree(source, target, XATTR_TREE, origin.vfs.xattrs).await?;

    for index in &origin.indexes {
        match (index.name.as_str(), index.kind.as_str()) {
            (CONTENT_TYPE_INDEX, BTREE_INDEX_KIND) => {
                sync_tree(source, target, INDEX_TREE, index.value).await?
            }
            _ => {
                return Err(Error::UnknownIndex {
                    name: index.name.clone(),
                    kind: index.kind.clone(),
                })
            }
        }
    }
    Ok(())
}

/// Pushes a tree root, every node, and every leaf value with what it
/// references. A root already present means the tree was fully copied
/// before; a node already present skips its own values only.
async fn sync_tree(source: &Snapshot, target: &Snapshot, kind: TreeKind, root_mac: Mac) -> Result<()> {
    let root = match push(source, target, kind.root, root_mac, None).await? {
        Pushed::Found => return Ok(()),
        Pushed::Pushed(data) => TreeRoot::from_bytes(&data)?,
    };

    let store = SnapshotStore::<String, Mac>::readonly(source, kind.node);
    let tree = BTree::load(&store, root);
    let mut walker = tree.walk();
    while let Some((node_mac, node)) = walker.next().await? {
        if push(source, target, kind.node, node_mac, Some(node.to_bytes()?)).await? == Pushed::Found {
            continue;
        }
        let Some(entry_type) = kind.entry else {
            continue;
        };
        for value in &node.values {
            if let Pushed::Pushed(data) = push(source, target, entry_type, *value, None).await? {
                if let Some(object) = referenced_object(entry_type, &data)? {
                    sync_object(source, target, &object).await?;
                }
            }
        }
    }
    Ok(())
}

fn referenced_object(entry_type: ResourceType, data: &[u8]) -> Result<Option<Mac>> {
    Ok(match entry_type {
        ResourceType::VfsEntry => Entry::from_bytes(data)?.object,
        ResourceType::XattrEntry => Xattr::from_bytes(data)?.object,
        _ => None,
    })
}

async fn sync_object(source: &Snapshot, target: &Snapshot, mac: &Mac) -> Result<()> {
    if let Pushed::Pushed(data) = push(source, target, ResourceType::Object, *mac, None).await? {
        let object = Object::from_bytes(&data)?;
        for chunk in &object.chunks {
            push(source, target, ResourceType::Chunk, chunk.mac, None).await?;
        }
    }
    Ok(())
}

/// Copies `(resource, mac)` into `target` unless it is already there.
/// `data`, when given, is used instead of reading the source.
pub async fn push(
    source: &Snapshot,
    target: &Snapshot,
    resource: ResourceType,
    mac: Mac,
    data: Option<Vec<u8>>,
) -> Result<Pushed> {
    if target.blob_exists(resource, &mac).await {
        return Ok(Pushed::Found);
    }
    let data = match data {
        Some(data) => data,
        None => source.get_blob(resource, &mac).await?,
    };
    target.put_blob(resource, mac, &data).await?;
    target.repository().logger().trace(
        "sync",
        format_args!("push {} {}: {} bytes", resource, mac.short_string(), data.len()),
    );
    Ok(Pushed::Pushed(data))
}
