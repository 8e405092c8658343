pub mod btree;
pub mod chunker;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod mac;
pub mod objects;
pub mod packfile;
pub mod params;
pub mod repository;
pub mod resources;
pub mod snapshot;
pub mod state;
pub mod storage;
pub mod sync;
pub mod transform;

pub use config::Configuration;
pub use error::{Error, Result};
pub use mac::{Mac, MacHasher};
pub use repository::Repository;
pub use resources::ResourceType;
pub use snapshot::Snapshot;
