//! Storage backends for snapvault repositories.
//!
//! The in-memory backend lives in `snapvault_core::storage`; this crate adds
//! the filesystem backend and a retrying wrapper for any backend.

pub mod local;
pub mod retry;

pub use local::LocalBackend;
pub use retry::{retry_with_backoff, RetryBackend, RetryConfig, Retryable};

use snapvault_core::storage::Backend;
use snapvault_core::{Error, Result};
use std::sync::Arc;

/// Resolves a repository location to a backend.
///
/// Accepts `fs://<path>`, `memory://<name>` or a bare filesystem path.
pub fn open_location(location: &str, retry: RetryConfig) -> Result<Arc<dyn Backend>> {
    if let Some(name) = location.strip_prefix("memory://") {
        return Ok(Arc::new(snapvault_core::storage::MemoryBackend::new(name)));
    }
    let path = location.strip_prefix("fs://").unwrap_or(location);
    if path.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "invalid repository location {:?}",
            location
        )));
    }
    Ok(Arc::new(RetryBackend::new(LocalBackend::new(path), retry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapvault_core::storage::BackendType;

    #[test]
    fn test_open_location() {
        let backend = open_location("fs:///tmp/repo", RetryConfig::quick()).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Local);
        assert_eq!(backend.location(), "fs:///tmp/repo");

        let backend = open_location("/srv/backups", RetryConfig::quick()).unwrap();
        assert_eq!(backend.location(), "fs:///srv/backups");

        let backend = open_location("memory://scratch", RetryConfig::quick()).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Memory);

        assert!(open_location("fs://", RetryConfig::quick()).is_err());
    }
}
