//! Bitstream Payloads
//!
//! Opaque configuration images addressed by filesystem path, with a
//! CRC-32 content checksum and the `.sig` signature-path convention.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to an image path to locate its detached signature.
pub const SIG_SUFFIX: &str = ".sig";

/// A configuration image stored on disk. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitstream {
    path: PathBuf,
}

impl Bitstream {
    /// Reference an image by path. Does not touch the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Conventional signature path: the image path with `.sig` appended.
    pub fn signature_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(SIG_SUFFIX);
        PathBuf::from(name)
    }

    /// Read the full payload.
    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// CRC-32 of the payload bytes.
    pub fn checksum(&self) -> io::Result<u32> {
        Ok(crc32(&self.read()?))
    }

    /// Image identifier: the file name, lowercased. Telemetry synthesis
    /// keys off markers embedded in it.
    pub fn identifier(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Bitwise CRC-32 (IEEE, poly 0xEDB88320).
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
