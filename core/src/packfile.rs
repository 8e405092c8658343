//! Packfile container.
//!
//! ```text
//! [ payload (L bytes) ]
//! [ index entry ]*      type:u8 | mac:32 | offset:u32 LE | length:u32 LE
//! [ L: u32 LE ]         last 4 bytes
//! ```

use crate::resources::ResourceType;
use crate::{Error, Mac, Result};
use std::collections::HashSet;

pub const BLOB_ENTRY_SIZE: usize = 1 + 32 + 4 + 4;
pub const TRAILER_SIZE: usize = 4;
/// Ceiling for the configured pack size. Offsets are u32 and a pack is
/// closed only after the blob that fills it, so half the range is kept
/// free for that last blob.
pub const MAX_PACKFILE_SIZE: u64 = u32::MAX as u64 / 2;

/// Index entry describing one blob in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob {
    pub resource: ResourceType,
    pub mac: Mac,
    pub offset: u32,
    pub length: u32,
}

impl Blob {
    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.resource as u8);
        out.extend_from_slice(self.mac.as_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
    }

    fn read_from(entry: &[u8]) -> Result<Self> {
        let resource = ResourceType::from_u8(entry[0])?;
        let mac = Mac::from_slice(&entry[1..33])
            .map_err(|_| Error::Format("truncated packfile index entry".to_string()))?;
        let offset = read_u32(&entry[33..37]);
        let length = read_u32(&entry[37..41]);
        Ok(Self {
            resource,
            mac,
            offset,
            length,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackFile {
    pub data: Vec<u8>,
    pub index: Vec<Blob>,
}

impl PackFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        if serialized.len() < TRAILER_SIZE {
            return Err(Error::Format(format!(
                "packfile too short: {} bytes",
                serialized.len()
            )));
        }

        let trailer_at = serialized.len() - TRAILER_SIZE;
        let total_length = read_u32(&serialized[trailer_at..]);
        let payload_end = total_length as usize;
        if payload_end > trailer_at {
            return Err(Error::Format(format!(
                "packfile payload length {} exceeds packfile size {}",
                total_length,
                serialized.len()
            )));
        }

        let index_bytes = &serialized[payload_end..trailer_at];
        if index_bytes.len() % BLOB_ENTRY_SIZE != 0 {
            return Err(Error::Format(format!(
                "packfile index has {} trailing bytes",
                index_bytes.len() % BLOB_ENTRY_SIZE
            )));
        }

        let mut index = Vec::with_capacity(index_bytes.len() / BLOB_ENTRY_SIZE);
        for entry in index_bytes.chunks_exact(BLOB_ENTRY_SIZE) {
            let blob = Blob::read_from(entry)?;
            if blob.offset as u64 + blob.length as u64 > total_length as u64 {
                return Err(Error::Format(
                    "blob offset + length exceeds total length of packfile".to_string(),
                ));
            }
            index.push(blob);
        }

        Ok(Self {
            data: serialized[..payload_end].to_vec(),
            index,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(
            self.data.len() + self.index.len() * BLOB_ENTRY_SIZE + TRAILER_SIZE,
        );
        buffer.extend_from_slice(&self.data);
        for blob in &self.index {
            blob.write_to(&mut buffer);
        }
        buffer.extend_from_slice(&self.size().to_le_bytes());
        buffer
    }

    /// Appends `data` and returns its index entry.
    pub fn add_blob(&mut self, resource: ResourceType, mac: Mac, data: &[u8]) -> Blob {
        let blob = Blob {
            resource,
            mac,
            offset: self.data.len() as u32,
            length: data.len() as u32,
        };
        self.index.push(blob);
        self.data.extend_from_slice(data);
        blob
    }

    /// Linear scan; the state engine indexes locations for the hot path.
    pub fn get_blob(&self, mac: &Mac) -> Option<&[u8]> {
        self.index.iter().find(|blob| blob.mac == *mac).map(|blob| {
            let start = blob.offset as usize;
            &self.data[start..start + blob.length as usize]
        })
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self, max_size: u64) -> bool {
        self.data.len() as u64 >= max_size
    }
}

/// Accumulates blobs into packfiles of bounded size.
#[derive(Debug)]
pub struct PackManager {
    current_pack: Option<PackFile>,
    pending: HashSet<(ResourceType, Mac)>,
    max_pack_size: u64,
}

impl PackManager {
    pub fn new(max_pack_size: u64) -> Self {
        Self {
            current_pack: None,
            pending: HashSet::new(),
            max_pack_size: max_pack_size.min(MAX_PACKFILE_SIZE),
        }
    }

    /// Adds a blob to the current pack. Returns the pack if this blob filled it.
    pub fn add_blob(&mut self, resource: ResourceType, mac: Mac, data: &[u8]) -> Option<PackFile> {
        let pack = self.current_pack.get_or_insert_with(PackFile::new);
        pack.add_blob(resource, mac, data);
        self.pending.insert((resource, mac));

        if pack.is_full(self.max_pack_size) {
            self.finish_current_pack()
        } else {
            None
        }
    }

    /// True while the blob sits in the unflushed pack.
    pub fn contains(&self, resource: ResourceType, mac: &Mac) -> bool {
        self.pending.contains(&(resource, *mac))
    }

    pub fn get_blob(&self, resource: ResourceType, mac: &Mac) -> Option<Vec<u8>> {
        if !self.contains(resource, mac) {
            return None;
        }
        let pack = self.current_pack.as_ref()?;
        pack.index
            .iter()
            .find(|blob| blob.resource == resource && blob.mac == *mac)
            .map(|blob| {
                let start = blob.offset as usize;
                pack.data[start..start + blob.length as usize].to_vec()
            })
    }

    pub fn finish_current_pack(&mut self) -> Option<PackFile> {
        self.pending.clear();
        self.current_pack.take().filter(|pack| !pack.is_empty())
    }
}
