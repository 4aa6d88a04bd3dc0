//! File-backed append-only log storage.
//!
//! Each entry is written as a 4-byte big-endian length prefix followed by
//! its raw bytes, mirroring the length-prefixed wire framing in
//! [`crate::transport`]. On startup the whole file is replayed to
//! reconstruct the in-memory log the consensus core expects.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

use bytes::Bytes;

use crate::error::NodeError;

pub trait Storage {
    fn append(&mut self, entry: &[u8]) -> Result<(), NodeError>;
    fn load_all(&self) -> Result<Vec<Bytes>, NodeError>;
}

/// Append-only log backed by a single file, fsynced after every write.
pub struct FileStorage {
    path: PathBuf,
    file: File,
}

impl FileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, NodeError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self { path, file })
    }
}

impl Storage for FileStorage {
    fn append(&mut self, entry: &[u8]) -> Result<(), NodeError> {
        let len = u32::try_from(entry.len())
            .map_err(|_| NodeError::MalformedFrame("entry too large to store".into()))?;
        self.file.write_all(&len.to_be_bytes())?;
        self.file.write_all(entry)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Bytes>, NodeError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            entries.push(Bytes::from(buf));
        }

        Ok(entries)
    }
}

/// In-memory storage for tests and the simulated-transport harness.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Vec<Bytes>,
}

impl Storage for MemoryStorage {
    fn append(&mut self, entry: &[u8]) -> Result<(), NodeError> {
        self.entries.push(Bytes::copy_from_slice(entry));
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Bytes>, NodeError> {
        Ok(self.entries.clone())
    }
}
