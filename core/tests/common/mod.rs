#![allow(dead_code)]

use snapvault_core::config::{ChunkingConfig, KdfParams};
use snapvault_core::logging::Logger;
use snapvault_core::snapshot::vfs::Filesystem;
use snapvault_core::snapshot::{Builder, Importer};
use snapvault_core::storage::MemoryBackend;
use snapvault_core::{crypto, Configuration, Mac, Repository, Snapshot};
use std::sync::Arc;

pub struct TestRepo {
    pub backend: Arc<MemoryBackend>,
    pub repo: Arc<Repository>,
    pub secret: Option<Vec<u8>>,
}

pub fn small_chunks() -> ChunkingConfig {
    ChunkingConfig {
        algorithm: "FASTCDC".to_string(),
        min_size: 256,
        normal_size: 1024,
        max_size: 4096,
    }
}

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        memory: 64,
        iterations: 1,
        parallelism: 1,
        ..KdfParams::default()
    }
}

pub async fn plain_repo(name: &str) -> TestRepo {
    let backend = Arc::new(MemoryBackend::new(name));
    let config = Configuration::new().with_chunking(small_chunks());
    Repository::create(backend.clone(), config, Logger::default())
        .await
        .unwrap();
    let repo = Repository::open_uncached(backend.clone(), None, Logger::default())
        .await
        .unwrap();
    TestRepo {
        backend,
        repo: Arc::new(repo),
        secret: None,
    }
}

pub async fn encrypted_repo(name: &str, passphrase: &str) -> TestRepo {
    let backend = Arc::new(MemoryBackend::new(name));
    let (encryption, key) = crypto::new_encryption_config(passphrase, fast_kdf()).unwrap();
    let config = Configuration::new()
        .with_chunking(small_chunks())
        .with_encryption(Some(encryption));
    Repository::create(backend.clone(), config, Logger::default())
        .await
        .unwrap();
    let repo = Repository::open_uncached(backend.clone(), Some(key.clone()), Logger::default())
        .await
        .unwrap();
    TestRepo {
        backend,
        repo: Arc::new(repo),
        secret: Some(key),
    }
}

/// Deterministic, poorly compressible content.
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

pub async fn backup(repo: &Arc<Repository>, files: &[(&str, Vec<u8>)]) -> Mac {
    let mut builder = Builder::new(repo.clone(), Importer::default()).await.unwrap();
    builder.add_directory("/", 0o755, None).await.unwrap();
    for (path, data) in files {
        builder.add_file(path, data, 0o644, None).await.unwrap();
    }
    builder.commit().await.unwrap()
}

pub async fn read_file(repo: &Arc<Repository>, id: &Mac, path: &str) -> Vec<u8> {
    let snapshot = Snapshot::load(repo.clone(), id).await.unwrap();
    let roots = snapshot.header().source(0).unwrap().vfs;
    Filesystem::new(&snapshot, roots).read_file(path).await.unwrap()
}
