pub mod backup;
pub mod init;
pub mod rm;
pub mod snapshots;
pub mod sync;

use crate::Context;
use anyhow::{anyhow, Result};
use snapvault_backends::{open_location, RetryConfig};
use snapvault_core::state::{DiskCache, MemoryCache, StateCache};
use snapvault_core::storage::Backend;
use snapvault_core::{crypto, Configuration, Error, Repository};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{info, warn};

pub fn repository_location(ctx: &Context, explicit: Option<&String>) -> Result<String> {
    explicit
        .or(ctx.repo.as_ref())
        .cloned()
        .ok_or_else(|| anyhow!("Repository location required (--repo or SNAPVAULT_REPO)"))
}

pub fn prompt_password(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    Ok(rpassword::read_password()?)
}

/// Derives the session secret, prompting until the passphrase verifies.
/// A supplied passphrase is tried first; if it is wrong the prompt takes over.
fn unlock(configuration: &Configuration, given: Option<&str>, location: &str) -> Result<Option<Vec<u8>>> {
    unlock_with(configuration, given, location, prompt_password)
}

fn unlock_with<F>(
    configuration: &Configuration,
    given: Option<&str>,
    location: &str,
    mut prompt: F,
) -> Result<Option<Vec<u8>>>
where
    F: FnMut(&str) -> Result<String>,
{
    let Some(encryption) = &configuration.encryption else {
        return Ok(None);
    };
    if let Some(password) = given {
        match crypto::unlock(encryption, password) {
            Ok(key) => return Ok(Some(key)),
            Err(Error::InvalidPassword) => warn!("Supplied password for {} is invalid", location),
            Err(e) => return Err(e.into()),
        }
    }
    loop {
        let password = prompt(&format!("Enter password for {}: ", location))?;
        match crypto::unlock(encryption, &password) {
            Ok(key) => return Ok(Some(key)),
            Err(Error::InvalidPassword) => eprintln!("Invalid password, try again"),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Opens the repository at `location` with a disk-backed state cache.
pub async fn open_repository(
    ctx: &Context,
    location: &str,
    password: Option<&str>,
    retry: RetryConfig,
) -> Result<Arc<Repository>> {
    let backend: Arc<dyn Backend> = open_location(location, retry)?;
    let configuration = Repository::read_configuration(backend.as_ref()).await?;
    let secret = unlock(&configuration, password, location)?;

    let cache: Arc<dyn StateCache> = match ctx.settings.state_cache_dir(&configuration.repository_id) {
        Some(dir) => Arc::new(DiskCache::new(dir).await?),
        None => {
            warn!("No cache directory available, state will be rebuilt from storage");
            Arc::new(MemoryCache::new())
        }
    };

    info!("Opening repository at: {}", backend.location());
    let repo = Repository::open(backend, secret, cache, ctx.logger.clone()).await?;
    Ok(Arc::new(repo))
}
