use crate::config::Configuration;
use crate::crypto;
use crate::envelope;
use crate::logging::Logger;
use crate::mac::MacHasher;
use crate::packfile::PackFile;
use crate::params;
use crate::resources::{ResourceType, FORMAT_VERSION};
use crate::state::{DeltaState, LocalState, Location, MemoryCache, StateCache, StateFragment};
use crate::storage::Backend;
use crate::transform::Transform;
use crate::{Error, Mac, Result};
use bytes::Bytes;
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const CONFIG_PATH: &str = "CONFIG";
pub const STATES_PREFIX: &str = "states";
pub const PACKFILES_PREFIX: &str = "packfiles";

/// A repository session.
///
/// Combines the storage backend, the MAC hasher keyed with the session
/// secret, the compression/encryption pipeline, and the aggregate state
/// rebuilt when the session is opened.
///
/// # Examples
///
/// ```no_run
/// use snapvault_core::{logging::Logger, state::MemoryCache, storage::MemoryBackend};
/// use snapvault_core::{Configuration, Repository};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> snapvault_core::Result<()> {
///     let backend = Arc::new(MemoryBackend::new("scratch"));
///     Repository::create(backend.clone(), Configuration::new(), Logger::default()).await?;
///
///     let repo = Repository::open(backend, None, Arc::new(MemoryCache::new()), Logger::default()).await?;
///     println!("{} snapshots", repo.get_snapshots().await.len());
///     Ok(())
/// }
/// ```
pub struct Repository {
    backend: Arc<dyn Backend>,
    configuration: Configuration,
    hasher: MacHasher,
    transform: Transform,
    state: RwLock<LocalState>,
    logger: Logger,
}

impl Repository {
    /// Writes the configuration of a new repository.
    ///
    /// # Errors
    ///
    /// Returns `Error::RepositoryExists` if the backend already holds a configuration.
    pub async fn create(
        backend: Arc<dyn Backend>,
        configuration: Configuration,
        logger: Logger,
    ) -> Result<()> {
        if backend.exists(CONFIG_PATH).await? {
            return Err(Error::RepositoryExists {
                location: backend.location(),
            });
        }
        backend.init().await?;

        let wrapped = envelope::serialize(
            &MacHasher::checksum(),
            ResourceType::Config,
            FORMAT_VERSION,
            &configuration.to_bytes()?,
        );
        backend.write(CONFIG_PATH, Bytes::from(wrapped)).await?;

        logger.info(format_args!(
            "created repository {} at {}",
            configuration.repository_id,
            backend.location()
        ));
        Ok(())
    }

    /// Reads the configuration without opening a session, so callers can
    /// find out whether a secret is needed.
    pub async fn read_configuration(backend: &dyn Backend) -> Result<Configuration> {
        if !backend.exists(CONFIG_PATH).await? {
            return Err(Error::RepositoryNotFound {
                location: backend.location(),
            });
        }
        let data = backend.read(CONFIG_PATH).await?;
        let (version, payload) =
            envelope::deserialize(&MacHasher::checksum(), ResourceType::Config, &data)?;
        Configuration::from_bytes(version, payload)
    }

    /// Opens a session and rebuilds its state from `cache` and the backend.
    ///
    /// # Errors
    ///
    /// * `Error::RepositoryNotFound` - no configuration at the backend location
    /// * `Error::InvalidPassword` - the repository is encrypted and `secret`
    ///   is missing or does not decrypt the canary
    pub async fn open(
        backend: Arc<dyn Backend>,
        secret: Option<Vec<u8>>,
        cache: Arc<dyn StateCache>,
        logger: Logger,
    ) -> Result<Self> {
        let configuration = Self::read_configuration(backend.as_ref()).await?;

        let hasher = match &configuration.encryption {
            Some(encryption) => {
                let key = secret.as_deref().ok_or(Error::InvalidPassword)?;
                if !crypto::verify_canary(encryption, key) {
                    return Err(Error::InvalidPassword);
                }
                MacHasher::from_secret(key)
            }
            None => MacHasher::for_repository_id(&configuration.repository_id),
        };
        let transform = Transform::new(&configuration, secret.as_deref())?;
        let state = LocalState::from_cache(cache).await?;

        let repo = Self {
            backend,
            configuration,
            hasher,
            transform,
            state: RwLock::new(state),
            logger,
        };
        repo.rebuild_state().await?;
        Ok(repo)
    }

    /// Opens a session with a throwaway in-memory state cache.
    pub async fn open_uncached(
        backend: Arc<dyn Backend>,
        secret: Option<Vec<u8>>,
        logger: Logger,
    ) -> Result<Self> {
        Self::open(backend, secret, Arc::new(MemoryCache::new()), logger).await
    }

    /// Reconciles the aggregate with the fragments stored in the backend.
    ///
    /// Remote fragments missing locally are fetched and merged, then local
    /// fragments unknown to the backend are evicted. Afterwards the aggregate
    /// reflects exactly the backend's fragment set.
    pub async fn rebuild_state(&self) -> Result<()> {
        let start = Instant::now();
        let remote: HashSet<Mac> = self.get_states().await?.into_iter().collect();
        let local: HashSet<Mac> = self.state.read().await.list_states().into_iter().collect();

        let mut missing: Vec<Mac> = remote.difference(&local).copied().collect();
        missing.sort();
        let mut fetched = Vec::with_capacity(missing.len());
        for id in &missing {
            let (version, data) = self.get_state(id).await?;
            fetched.push((*id, StateFragment::from_bytes(version, &data)?));
        }

        // Fragments committed by this session since `local` was listed are
        // not in `remote` either, so only evict what was listed.
        let outdated: Vec<Mac> = local.difference(&remote).copied().collect();

        let mut state = self.state.write().await;
        let known: HashSet<Mac> = state.list_states().into_iter().collect();
        for (id, fragment) in fetched {
            if !known.contains(&id) {
                state.merge(id, fragment).await?;
            }
        }
        for id in &outdated {
            state.del_state(id).await?;
        }

        state.update_serial_or(serial_seed(&self.configuration.repository_id));

        self.logger.trace(
            "state",
            format_args!(
                "rebuild: merged {} missing, evicted {} outdated, serial {}: {:?}",
                missing.len(),
                outdated.len(),
                state.serial(),
                start.elapsed()
            ),
        );
        Ok(())
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn compute_mac(&self, data: &[u8]) -> Mac {
        self.hasher.compute(data)
    }

    pub fn encode<R: Read>(&self, input: R) -> Result<Vec<u8>> {
        let start = Instant::now();
        let encoded = self.transform.encode(input);
        self.logger
            .trace("repository", format_args!("encode: {:?}", start.elapsed()));
        encoded
    }

    pub fn decode<R: Read>(&self, input: R) -> Result<Vec<u8>> {
        let start = Instant::now();
        let decoded = self.transform.decode(input);
        self.logger
            .trace("repository", format_args!("decode: {:?}", start.elapsed()));
        decoded
    }

    pub fn encode_buffer(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.encode(data)
    }

    pub fn decode_buffer(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.decode(data)
    }

    /// Live snapshot identifiers, sorted.
    pub async fn get_snapshots(&self) -> Vec<Mac> {
        self.state.read().await.list_snapshots()
    }

    /// Live snapshots whose hex identifier starts with `prefix`.
    pub async fn locate_snapshots(&self, prefix: &str) -> Vec<Mac> {
        self.get_snapshots()
            .await
            .into_iter()
            .filter(|id| params::matches_prefix(id, prefix))
            .collect()
    }

    pub async fn list_packfiles(&self) -> Vec<Mac> {
        self.state.read().await.list_packfiles()
    }

    /// True if the aggregate holds a tombstone for `mac`.
    pub async fn has_deleted_packfile(&self, mac: &Mac) -> bool {
        self.has_deleted_resource(ResourceType::Packfile, mac).await
    }

    pub async fn blob_exists(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.state.read().await.blob_exists(resource, mac)
    }

    pub async fn has_deleted_resource(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.state.read().await.has_deleted_resource(resource, mac)
    }

    /// Reads and decodes a blob through its indexed location.
    ///
    /// # Errors
    ///
    /// * `Error::BlobNotFound` - the state has no location for the blob
    /// * `Error::ConsistencyFault` - the blob lives in a packfile the state
    ///   lists as deleted
    pub async fn get_blob(&self, resource: ResourceType, mac: &Mac) -> Result<Vec<u8>> {
        let start = Instant::now();
        let location = {
            let state = self.state.read().await;
            let location =
                state
                    .get_subpart_for_blob(resource, mac)
                    .ok_or_else(|| Error::BlobNotFound {
                        resource: resource.to_string(),
                        mac: mac.to_string(),
                    })?;
            if state.has_deleted_resource(ResourceType::Packfile, &location.packfile) {
                return Err(Error::ConsistencyFault {
                    mac: mac.to_string(),
                    packfile: location.packfile.to_string(),
                });
            }
            location
        };

        let raw = self.get_packfile_blob(&location).await?;
        let data = self.decode_buffer(&raw)?;
        self.logger.trace(
            "repository",
            format_args!(
                "get_blob({}, {}): {} bytes {:?}",
                resource,
                mac,
                data.len(),
                start.elapsed()
            ),
        );
        Ok(data)
    }

    /// Reads the still encoded bytes at `location`.
    pub async fn get_packfile_blob(&self, location: &Location) -> Result<Vec<u8>> {
        let start = Instant::now();
        let path = packfile_path(&location.packfile);
        let data = self
            .backend
            .read_range(
                &path,
                envelope::HEADER_SIZE as u64 + location.offset,
                location.length,
            )
            .await?;
        self.logger.trace(
            "packfile",
            format_args!(
                "get_packfile_blob({}, {}, {}): {:?}",
                location.packfile,
                location.offset,
                location.length,
                start.elapsed()
            ),
        );
        Ok(data.to_vec())
    }

    pub async fn get_packfile(&self, mac: &Mac) -> Result<PackFile> {
        let path = packfile_path(mac);
        if !self.backend.exists(&path).await? {
            return Err(Error::PackfileNotFound {
                mac: mac.to_string(),
            });
        }
        let data = self.backend.read(&path).await?;
        let (_, payload) = envelope::deserialize(&self.hasher, ResourceType::Packfile, &data)?;
        PackFile::from_bytes(payload)
    }

    /// Stores a packfile and returns its identifier. Blob bytes inside are
    /// expected to be encoded already.
    pub async fn put_packfile(&self, pack: &PackFile) -> Result<Mac> {
        let start = Instant::now();
        let serialized = pack.serialize();
        let mac = self.compute_mac(&serialized);
        let wrapped =
            envelope::serialize(&self.hasher, ResourceType::Packfile, FORMAT_VERSION, &serialized);
        self.backend
            .write(&packfile_path(&mac), Bytes::from(wrapped))
            .await?;
        self.logger.trace(
            "packfile",
            format_args!(
                "put_packfile({}): {} blobs, {} bytes {:?}",
                mac,
                pack.index.len(),
                pack.size(),
                start.elapsed()
            ),
        );
        Ok(mac)
    }

    /// Identifiers of the packfiles present in the backend, referenced or not.
    /// Unlike [`Repository::list_packfiles`] this includes packs no committed
    /// fragment points at.
    pub async fn get_packfiles(&self) -> Result<Vec<Mac>> {
        let start = Instant::now();
        let packfiles = self.list_identifiers(PACKFILES_PREFIX).await?;
        self.logger.trace(
            "repository",
            format_args!("get_packfiles(): {} found {:?}", packfiles.len(), start.elapsed()),
        );
        Ok(packfiles)
    }

    /// Removes a packfile from the backend. The state is left alone.
    pub async fn delete_packfile(&self, mac: &Mac) -> Result<()> {
        let start = Instant::now();
        self.backend.delete(&packfile_path(mac)).await?;
        self.logger.trace(
            "repository",
            format_args!("delete_packfile({}): {:?}", mac, start.elapsed()),
        );
        Ok(())
    }

    /// Stores `pack` and records its blobs' locations in `delta`.
    pub async fn flush_packfile(&self, pack: &PackFile, delta: &mut DeltaState) -> Result<Mac> {
        let mac = self.put_packfile(pack).await?;
        for blob in &pack.index {
            delta.put_location(
                blob.resource,
                blob.mac,
                Location {
                    packfile: mac,
                    offset: blob.offset as u64,
                    length: blob.length,
                },
            );
        }
        delta.put_packfile(mac);
        Ok(mac)
    }

    /// Identifiers of the fragments stored in the backend.
    pub async fn get_states(&self) -> Result<Vec<Mac>> {
        self.list_identifiers(STATES_PREFIX).await
    }

    /// Removes a fragment from the backend. Sessions drop it from their
    /// aggregate at their next rebuild.
    pub async fn delete_state(&self, id: &Mac) -> Result<()> {
        let start = Instant::now();
        self.backend.delete(&state_path(id)).await?;
        self.logger.trace(
            "repository",
            format_args!("delete_state({}): {:?}", id, start.elapsed()),
        );
        Ok(())
    }

    async fn list_identifiers(&self, prefix: &str) -> Result<Vec<Mac>> {
        let mut identifiers = Vec::new();
        for path in self.backend.list(prefix).await? {
            let name = path.rsplit('/').next().unwrap_or(&path);
            match name.parse::<Mac>() {
                Ok(id) => identifiers.push(id),
                Err(_) => self
                    .logger
                    .warn(format_args!("ignoring unexpected object {}", path)),
            }
        }
        identifiers.sort();
        Ok(identifiers)
    }

    /// Fetches one fragment, returning its format version and decoded bytes.
    pub async fn get_state(&self, id: &Mac) -> Result<(u32, Vec<u8>)> {
        let data = self.backend.read(&state_path(id)).await?;
        let (version, payload) = envelope::deserialize(&self.hasher, ResourceType::State, &data)?;
        Ok((version, self.decode_buffer(payload)?))
    }

    pub async fn put_state(&self, fragment: &StateFragment) -> Result<Mac> {
        let serialized = fragment.to_bytes()?;
        let id = self.compute_mac(&serialized);
        let encoded = self.encode_buffer(&serialized)?;
        let wrapped = envelope::serialize(&self.hasher, ResourceType::State, FORMAT_VERSION, &encoded);
        self.backend.write(&state_path(&id), Bytes::from(wrapped)).await?;
        Ok(id)
    }

    /// Opens a delta numbered after the current aggregate.
    pub async fn new_delta(&self) -> DeltaState {
        self.state.read().await.derive()
    }

    /// Persists `delta` as a new fragment and merges it into the session
    /// aggregate. Empty deltas are dropped.
    pub async fn commit_delta(&self, delta: DeltaState) -> Result<Option<Mac>> {
        if delta.is_empty() {
            return Ok(None);
        }
        let fragment = delta.into_fragment();
        let id = self.put_state(&fragment).await?;
        self.state.write().await.merge(id, fragment).await?;
        self.logger
            .trace("state", format_args!("committed state {}", id));
        Ok(Some(id))
    }

    /// Tombstones a snapshot. Its blobs stay in place.
    pub async fn delete_snapshot(&self, id: &Mac) -> Result<()> {
        let mut delta = {
            let state = self.state.read().await;
            if !state.list_snapshots().contains(id) {
                return Err(Error::SnapshotNotFound { id: id.to_string() });
            }
            state.derive()
        };
        delta.delete_resource(ResourceType::Snapshot, *id);
        self.commit_delta(delta).await?;
        self.logger
            .info(format_args!("deleted snapshot {}", id.short_string()));
        Ok(())
    }
}

/// Serial floor derived from the repository id, so that two repositories
/// that never synchronized start from different serials.
pub fn serial_seed(repository_id: &Uuid) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&repository_id.as_bytes()[..8]);
    u64::from_be_bytes(bytes) >> 1
}

fn state_path(id: &Mac) -> String {
    format!("{}/{}", STATES_PREFIX, id.to_hex())
}

fn packfile_path(id: &Mac) -> String {
    format!("{}/{}", PACKFILES_PREFIX, id.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    async fn scratch() -> (Arc<MemoryBackend>, Repository) {
        let backend = Arc::new(MemoryBackend::new("test"));
        Repository::create(backend.clone(), Configuration::new(), Logger::default())
            .await
            .unwrap();
        let repo = Repository::open_uncached(backend.clone(), None, Logger::default())
            .await
            .unwrap();
        (backend, repo)
    }

    async fn store(repo: &Repository, blobs: &[(ResourceType, &[u8])]) -> Vec<Mac> {
        let mut pack = PackFile::new();
        let mut macs = Vec::new();
        for (resource, data) in blobs {
            let mac = repo.compute_mac(data);
            pack.add_blob(*resource, mac, &repo.encode_buffer(data).unwrap());
            macs.push(mac);
        }
        let mut delta = repo.new_delta().await;
        repo.flush_packfile(&pack, &mut delta).await.unwrap();
        repo.commit_delta(delta).await.unwrap();
        macs
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let (backend, _) = scratch().await;
        let err = Repository::create(backend, Configuration::new(), Logger::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepositoryExists { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_repository() {
        let backend = Arc::new(MemoryBackend::new("empty"));
        let err = Repository::open_uncached(backend, None, Logger::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::RepositoryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let (_, repo) = scratch().await;
        let macs = store(
            &repo,
            &[
                (ResourceType::Chunk, b"first chunk"),
                (ResourceType::Object, b"an object"),
            ],
        )
        .await;

        assert!(repo.blob_exists(ResourceType::Chunk, &macs[0]).await);
        assert!(!repo.blob_exists(ResourceType::Object, &macs[0]).await);
        assert_eq!(
            repo.get_blob(ResourceType::Object, &macs[1]).await.unwrap(),
            b"an object"
        );
        assert_eq!(repo.list_packfiles().await.len(), 1);

        let missing = repo.get_blob(ResourceType::Object, &macs[0]).await.unwrap_err();
        assert!(matches!(missing, Error::BlobNotFound { .. }));
        assert!(!missing.is_fatal());
    }

    #[tokio::test]
    async fn test_blob_in_deleted_packfile_is_fatal() {
        let (_, repo) = scratch().await;
        let macs = store(&repo, &[(ResourceType::Chunk, b"orphaned")]).await;
        let packfile = repo.list_packfiles().await[0];

        let mut delta = repo.new_delta().await;
        delta.delete_resource(ResourceType::Packfile, packfile);
        repo.commit_delta(delta).await.unwrap();

        let err = repo.get_blob(ResourceType::Chunk, &macs[0]).await.unwrap_err();
        assert!(matches!(err, Error::ConsistencyFault { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_get_packfile_verifies_envelope() {
        let (backend, repo) = scratch().await;
        store(&repo, &[(ResourceType::Chunk, b"abc")]).await;
        let mac = repo.list_packfiles().await[0];

        let pack = repo.get_packfile(&mac).await.unwrap();
        assert_eq!(pack.index.len(), 1);

        let path = packfile_path(&mac);
        let mut data = backend.read(&path).await.unwrap().to_vec();
        data[envelope::HEADER_SIZE] ^= 0xff;
        backend.write(&path, Bytes::from(data)).await.unwrap();
        assert!(matches!(repo.get_packfile(&mac).await, Err(Error::Format(_))));

        let unknown = Mac::new([3; 32]);
        assert!(matches!(
            repo.get_packfile(&unknown).await,
            Err(Error::PackfileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_rebuild_reflects_remote_fragments() {
        let (backend, repo) = scratch().await;
        let kept = store(&repo, &[(ResourceType::Snapshot, b"kept")]).await[0];
        let dropped = store(&repo, &[(ResourceType::Snapshot, b"dropped")]).await[0];
        assert_eq!(repo.get_snapshots().await.len(), 2);

        // Another session adds a fragment and a third removes one of ours.
        let other = Repository::open_uncached(backend.clone(), None, Logger::default())
            .await
            .unwrap();
        let added = store(&other, &[(ResourceType::Snapshot, b"added")]).await[0];
        let states = repo.get_states().await.unwrap();
        for id in states {
            let (version, data) = repo.get_state(&id).await.unwrap();
            let fragment = StateFragment::from_bytes(version, &data).unwrap();
            if fragment.locations.iter().any(|entry| entry.mac == dropped) {
                backend.delete(&state_path(&id)).await.unwrap();
            }
        }

        repo.rebuild_state().await.unwrap();
        let mut expected = vec![kept, added];
        expected.sort();
        assert_eq!(repo.get_snapshots().await, expected);
        assert!(!repo.blob_exists(ResourceType::Snapshot, &dropped).await);
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let (backend, repo) = scratch().await;
        let id = store(&repo, &[(ResourceType::Snapshot, b"header")]).await[0];
        assert_eq!(repo.locate_snapshots(&id.to_hex()[..6]).await, vec![id]);

        repo.delete_snapshot(&id).await.unwrap();
        assert!(repo.get_snapshots().await.is_empty());
        assert!(matches!(
            repo.delete_snapshot(&id).await,
            Err(Error::SnapshotNotFound { .. })
        ));

        let reopened = Repository::open_uncached(backend, None, Logger::default())
            .await
            .unwrap();
        assert!(reopened.get_snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_packfile_and_state_store_operations() {
        let (backend, repo) = scratch().await;
        let mac = store(&repo, &[(ResourceType::Chunk, b"stored")]).await[0];
        let packfile = repo.list_packfiles().await[0];
        assert_eq!(repo.get_packfiles().await.unwrap(), vec![packfile]);
        assert!(!repo.has_deleted_packfile(&packfile).await);

        let mut delta = repo.new_delta().await;
        delta.delete_resource(ResourceType::Packfile, packfile);
        repo.commit_delta(delta).await.unwrap();
        assert!(repo.has_deleted_packfile(&packfile).await);
        assert!(repo.list_packfiles().await.is_empty());

        repo.delete_packfile(&packfile).await.unwrap();
        assert!(repo.get_packfiles().await.unwrap().is_empty());
        assert!(!backend.exists(&packfile_path(&packfile)).await.unwrap());

        let states = repo.get_states().await.unwrap();
        assert_eq!(states.len(), 2);
        for id in &states {
            repo.delete_state(id).await.unwrap();
        }
        assert!(repo.get_states().await.unwrap().is_empty());
        repo.rebuild_state().await.unwrap();
        assert!(!repo.blob_exists(ResourceType::Chunk, &mac).await);
        assert!(!repo.has_deleted_packfile(&packfile).await);
    }

    #[tokio::test]
    async fn test_serial_seeded_from_repository_id() {
        let (_, repo) = scratch().await;
        let seed = serial_seed(&repo.configuration().repository_id);
        assert_eq!(repo.new_delta().await.serial(), seed + 1);
    }

    #[tokio::test]
    async fn test_encrypted_repository() {
        let backend = Arc::new(MemoryBackend::new("encrypted"));
        let (encryption, key) =
            crypto::new_encryption_config("secret", crypto::test_kdf_params()).unwrap();
        let config = Configuration::new().with_encryption(Some(encryption));
        Repository::create(backend.clone(), config, Logger::default())
            .await
            .unwrap();

        let err = Repository::open_uncached(backend.clone(), None, Logger::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPassword));
        let err = Repository::open_uncached(backend.clone(), Some(vec![0u8; 32]), Logger::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidPassword));

        let repo = Repository::open_uncached(backend.clone(), Some(key), Logger::default())
            .await
            .unwrap();
        let mac = store(&repo, &[(ResourceType::Chunk, b"plaintext marker")]).await[0];
        assert_eq!(
            repo.get_blob(ResourceType::Chunk, &mac).await.unwrap(),
            b"plaintext marker"
        );
        assert_ne!(mac, Mac::from(blake3::hash(b"plaintext marker")));
    }
}
