use crate::resources::{ResourceType, FORMAT_VERSION};
use crate::{Error, Mac, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot metadata, stored as a `snapshot` blob keyed by its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub identifier: Mac,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub identity: Identity,
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
    pub context: Context,
    pub sources: Vec<Source>,
}

/// Who signed the snapshot, if anyone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub identifier: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub hostname: String,
    pub username: String,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub importer: Importer,
    pub vfs: VfsRoots,
    pub indexes: Vec<Index>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Importer {
    pub kind: String,
    pub origin: String,
    pub directory: String,
}

/// Root blob identifiers of the three trees describing a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsRoots {
    pub root: Mac,
    pub errors: Mac,
    pub xattrs: Mac,
}

/// A named secondary index over a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub kind: String,
    pub value: Mac,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub files: u64,
    pub directories: u64,
    pub size: u64,
    pub errors: u64,
}

impl Header {
    pub fn new() -> Self {
        Self {
            identifier: Mac::random(),
            version: FORMAT_VERSION,
            timestamp: Utc::now(),
            duration_ms: 0,
            identity: Identity::default(),
            name: String::new(),
            category: "default".to_string(),
            tags: Vec::new(),
            context: Context::current(),
            sources: Vec::new(),
        }
    }

    pub fn short_id(&self) -> String {
        self.identifier.short_string()
    }

    pub fn source(&self, index: usize) -> Result<&Source> {
        self.sources
            .get(index)
            .ok_or_else(|| Error::Format(format!("snapshot has no source {}", index)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header: Header = bincode::deserialize(data)
            .map_err(|e| Error::Format(format!("malformed snapshot header: {}", e)))?;
        if !ResourceType::Snapshot.is_supported_version(header.version) {
            return Err(Error::InvalidFormatVersion {
                resource: ResourceType::Snapshot.to_string(),
                version: header.version,
            });
        }
        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn current() -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            hostname,
            username,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}
