use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Repository not found at {location}")]
    RepositoryNotFound { location: String },

    #[error("Repository already exists at {location}")]
    RepositoryExists { location: String },

    #[error("Invalid format version {version} for {resource}")]
    InvalidFormatVersion { resource: String, version: u32 },

    #[error("blob not found: {resource} {mac}")]
    BlobNotFound { resource: String, mac: String },

    #[error("packfile not found: {mac}")]
    PackfileNotFound { mac: String },

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    #[error("read-only store")]
    ReadOnly,

    /// A live location points into a packfile that the state lists as
    /// deleted. Never retried, never skipped.
    #[error("consistency fault: blob {mac} is referenced from deleted packfile {packfile}")]
    ConsistencyFault { mac: String, packfile: String },

    #[error("invalid_params: {0}")]
    InvalidParameter(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("don't know how to sync the index {name} of type {kind}")]
    UnknownIndex { name: String, kind: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Fatal errors signal internal corruption and must stop the caller
    /// instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConsistencyFault { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BlobNotFound { .. } | Error::PackfileNotFound { .. } | Error::SnapshotNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
