use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Major versions are `version / 100`; readers accept any minor revision.
pub const FORMAT_VERSION: u32 = 100;

/// Kind of a stored blob. MACs are unique per `(ResourceType, Mac)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResourceType {
    Config = 1,
    State = 2,
    Packfile = 3,
    Snapshot = 4,
    Signature = 5,
    Object = 6,
    Chunk = 7,
    VfsBtree = 8,
    VfsNode = 9,
    VfsEntry = 10,
    ErrorBtree = 11,
    ErrorNode = 12,
    ErrorEntry = 13,
    XattrBtree = 14,
    XattrNode = 15,
    XattrEntry = 16,
    BtreeRoot = 17,
    BtreeNode = 18,
}

impl ResourceType {
    pub const ALL: [ResourceType; 18] = [
        ResourceType::Config,
        ResourceType::State,
        ResourceType::Packfile,
        ResourceType::Snapshot,
        ResourceType::Signature,
        ResourceType::Object,
        ResourceType::Chunk,
        ResourceType::VfsBtree,
        ResourceType::VfsNode,
        ResourceType::VfsEntry,
        ResourceType::ErrorBtree,
        ResourceType::ErrorNode,
        ResourceType::ErrorEntry,
        ResourceType::XattrBtree,
        ResourceType::XattrNode,
        ResourceType::XattrEntry,
        ResourceType::BtreeRoot,
        ResourceType::BtreeNode,
    ];

    pub fn from_u8(value: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as u8 == value)
            .ok_or_else(|| Error::Format(format!("unknown resource type {}", value)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Config => "config",
            ResourceType::State => "state",
            ResourceType::Packfile => "packfile",
            ResourceType::Snapshot => "snapshot",
            ResourceType::Signature => "signature",
            ResourceType::Object => "object",
            ResourceType::Chunk => "chunk",
            ResourceType::VfsBtree => "vfs btree",
            ResourceType::VfsNode => "vfs node",
            ResourceType::VfsEntry => "vfs entry",
            ResourceType::ErrorBtree => "error btree",
            ResourceType::ErrorNode => "error node",
            ResourceType::ErrorEntry => "error entry",
            ResourceType::XattrBtree => "xattr btree",
            ResourceType::XattrNode => "xattr node",
            ResourceType::XattrEntry => "xattr entry",
            ResourceType::BtreeRoot => "btree root",
            ResourceType::BtreeNode => "btree node",
        }
    }

    /// Current on-disk format version for this resource type.
    pub fn current_version(&self) -> u32 {
        FORMAT_VERSION
    }

    pub fn is_supported_version(&self, version: u32) -> bool {
        version / 100 == self.current_version() / 100
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for rtype in ResourceType::ALL {
            assert_eq!(ResourceType::from_u8(rtype as u8).unwrap(), rtype);
        }
        assert!(ResourceType::from_u8(0).is_err());
        assert!(ResourceType::from_u8(200).is_err());
    }

    #[test]
    fn test_version_compatibility() {
        assert!(ResourceType::State.is_supported_version(100));
        assert!(ResourceType::State.is_supported_version(101));
        assert!(!ResourceType::State.is_supported_version(200));
    }
}
