//! Versioned binary archives for trained transformers
//!
//! Every archive opens with a 2-byte major / 2-byte minor version pair
//! followed by a type-specific payload. Payload values use fixed-width
//! little-endian encodings with u64 length prefixes on sequences, so the
//! layout is stable across platforms.

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Major/minor version pair at the head of every archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Incompatible layout changes
    pub major: u16,
    /// Backward-compatible additions
    pub minor: u16,
}

impl Version {
    /// Build a version pair.
    pub const fn new(major: u16, minor: u16) -> Self {
        Version { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Growable byte sink for serializing a transformer.
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    buf: Vec<u8>,
}

impl ArchiveWriter {
    /// Create an empty archive.
    pub fn new() -> Self {
        ArchiveWriter::default()
    }

    /// Write the version header.
    pub fn write_version(&mut self, version: Version) -> Result<()> {
        self.write(&version.major)?;
        self.write(&version.minor)
    }

    /// Append one value in the archive encoding.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.buf, value)?;
        Ok(())
    }

    /// Append bytes as-is, without a length prefix.
    ///
    /// For embedding an already-encoded archive whose extent the reader can
    /// recover on its own.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer, yielding the archive bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Persist the archive to `path`.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.buf)?;
        Ok(())
    }
}

/// Sequential reader over archive bytes.
pub struct ArchiveReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ArchiveReader<'a> {
    /// Read from the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        ArchiveReader { cursor: Cursor::new(bytes) }
    }

    /// Read the version header at the current position.
    pub fn read_version(&mut self) -> Result<Version> {
        let major = self.read::<u16>()?;
        let minor = self.read::<u16>()?;
        Ok(Version::new(major, minor))
    }

    /// Read the version header and reject anything but `expected`.
    pub fn expect_version(&mut self, expected: Version) -> Result<()> {
        let found = self.read_version()?;
        if found == expected {
            Ok(())
        } else {
            Err(Error::UnsupportedArchiveVersion { major: found.major, minor: found.minor })
        }
    }

    /// Read one value in the archive encoding.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = bincode::deserialize_from(&mut self.cursor)?;
        Ok(value)
    }

    /// Byte offset of the next read.
    pub fn position(&self) -> usize {
        usize::try_from(self.cursor.position()).unwrap_or(usize::MAX)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The bytes spanning `[start, end)`, for composite formats that re-read
    /// an embedded payload.
    pub fn slice(&self, start: usize, end: usize) -> Result<&'a [u8]> {
        self.cursor
            .get_ref()
            .get(start..end)
            .ok_or_else(|| Error::MalformedArchive(format!("byte range {start}..{end} out of bounds")))
    }
}

impl fmt::Debug for ArchiveReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("position", &self.position())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// A model file mapped into memory.
///
/// Keeps the mapping alive while readers borrow from it; trained models are
/// read-heavy and often large enough that copying them through a `Vec` first
/// is wasteful.
#[derive(Debug)]
pub struct MappedArchive {
    map: memmap2::Mmap,
}

impl MappedArchive {
    /// Map the archive at `path`.
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is private and read-only; mutation of the
        // underlying file while mapped is outside this crate's contract.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MappedArchive { map })
    }

    /// The mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// A reader positioned at the start of the archive.
    pub fn reader(&self) -> ArchiveReader<'_> {
        ArchiveReader::new(&self.map)
    }
}
