//! On-disk layout of cache artifacts.
//!
//! ```text
//! offset  size  field
//! 0       8     magic "ZTCACHE\0"
//! 8       4     schema version
//! 12      4     width
//! 16      4     height
//! 20      4     source bits per pixel
//! 24      1     source format (1 = png)
//! 32      8     source signature: newest modification time (ns since epoch)
//! 40      8     source signature: total bytes
//! 48      2     primary source path length
//! 50      n     primary source path (UTF-8)
//! 4096    ...   RGBA8 rows, width * 4 bytes each
//! ```
//!
//! All integers are little-endian. The header occupies exactly one block.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::EngineError;
use crate::source::PartGrid;

use super::ImageFormat;

pub const CACHE_MAGIC: [u8; 8] = *b"ZTCACHE\0";

/// Current schema version; artifacts with any other version are incompatible.
pub const CACHE_VERSION: u32 = 1;

/// Size of the header, and of one block when counting blocks.
pub const BLOCK_SIZE: u64 = 4096;

pub const BYTES_PER_PIXEL: u64 = 4;

const PATH_OFFSET: usize = 50;
const MAX_PATH_LEN: usize = BLOCK_SIZE as usize - PATH_OFFSET;

/// Recorded identity of the sources an artifact was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature {
    pub modified_nanos: i64,
    pub bytes: u64,
}

impl Signature {
    /// Newest modification time and total size over all parts.
    pub fn of_parts(parts: &PartGrid) -> Result<Self, EngineError> {
        let mut signature = Signature::default();

        for path in parts.parts() {
            let metadata = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
            let modified = metadata
                .modified()
                .map_err(|e| EngineError::io(path, e))?;

            signature.modified_nanos = signature.modified_nanos.max(nanos_since_epoch(modified));
            signature.bytes += metadata.len();
        }

        Ok(signature)
    }
}

pub fn nanos_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Result of reading a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Valid(ArtifactHeader),
    /// Not an artifact at all
    BadMagic,
    /// An artifact written with another schema version
    Version(u32),
    /// Magic and version match but the header is unreadable
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub format: ImageFormat,
    pub signature: Signature,
    pub source_path: PathBuf,
}

impl ArtifactHeader {
    /// Encode into a full header block.
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        let path = self.source_path.to_string_lossy();
        let path = path.as_bytes();
        if path.len() > MAX_PATH_LEN {
            return Err(EngineError::InvalidPath {
                path: self.source_path.clone(),
                reason: format!("longer than {} bytes", MAX_PATH_LEN),
            });
        }

        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        buf[0..8].copy_from_slice(&CACHE_MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.width.to_le_bytes());
        buf[16..20].copy_from_slice(&self.height.to_le_bytes());
        buf[20..24].copy_from_slice(&self.bits_per_pixel.to_le_bytes());
        buf[24] = format_code(self.format);
        buf[32..40].copy_from_slice(&self.signature.modified_nanos.to_le_bytes());
        buf[40..48].copy_from_slice(&self.signature.bytes.to_le_bytes());
        buf[48..50].copy_from_slice(&(path.len() as u16).to_le_bytes());
        buf[PATH_OFFSET..PATH_OFFSET + path.len()].copy_from_slice(path);

        Ok(buf)
    }

    /// Decode a header block (or as much of it as was read).
    pub fn decode(buf: &[u8]) -> Probe {
        if !has_magic(buf) {
            return Probe::BadMagic;
        }
        if buf.len() < 12 {
            return Probe::Corrupt("header truncated".to_string());
        }

        let version = read_u32(buf, 8);
        if version != CACHE_VERSION {
            return Probe::Version(version);
        }
        if buf.len() < PATH_OFFSET {
            return Probe::Corrupt("header truncated".to_string());
        }

        let format = match buf[24] {
            1 => ImageFormat::Png,
            other => return Probe::Corrupt(format!("unknown source format {}", other)),
        };

        let path_len = u16::from_le_bytes([buf[48], buf[49]]) as usize;
        if path_len > MAX_PATH_LEN || buf.len() < PATH_OFFSET + path_len {
            return Probe::Corrupt("source path truncated".to_string());
        }
        let source_path = String::from_utf8_lossy(&buf[PATH_OFFSET..PATH_OFFSET + path_len]);

        Probe::Valid(ArtifactHeader {
            version,
            width: read_u32(buf, 12),
            height: read_u32(buf, 16),
            bits_per_pixel: read_u32(buf, 20),
            format,
            signature: Signature {
                modified_nanos: read_i64(buf, 32),
                bytes: read_u64(buf, 40),
            },
            source_path: PathBuf::from(source_path.into_owned()),
        })
    }

    /// Bytes per stored row.
    pub fn row_bytes(&self) -> u64 {
        self.width as u64 * BYTES_PER_PIXEL
    }

    /// Offset of pixel (x, y) in the artifact file.
    pub fn pixel_offset(&self, x: u64, y: u64) -> u64 {
        BLOCK_SIZE + y * self.row_bytes() + x * BYTES_PER_PIXEL
    }

    /// Expected artifact size.
    pub fn file_len(&self) -> u64 {
        BLOCK_SIZE + self.height as u64 * self.row_bytes()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }
}

pub fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= CACHE_MAGIC.len() && buf[..CACHE_MAGIC.len()] == CACHE_MAGIC
}

/// Number of blocks occupied by `bytes`, rounding up.
pub fn block_count(bytes: u64) -> u64 {
    bytes.div_ceil(BLOCK_SIZE)
}

fn format_code(format: ImageFormat) -> u8 {
    match format {
        ImageFormat::Png => 1,
        ImageFormat::Cache => 0,
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(bytes)
}
