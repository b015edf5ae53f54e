// Durable single-record files.
//
// Layout: u32 LE payload length, payload bytes (bincode), u32 LE CRC32C
// of the payload. Writes go through a temp file, fsync, and rename so a
// crash never leaves a torn record; readers reject any CRC mismatch.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{ConsensusError, Result};

/// Whether a write may replace an existing record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    NoOverwrite,
}

/// Whether a write must be fsynced before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Sync,
    NoSync,
}

/// Serialize `record` and atomically write it to `path`.
///
/// In `SyncMode::Sync` the file is fsynced before the rename and the
/// containing directory is fsynced after it.
pub fn write<T: bincode::Encode>(
    path: &Path,
    record: &T,
    mode: WriteMode,
    sync: SyncMode,
) -> Result<()> {
    if mode == WriteMode::NoOverwrite && path.exists() {
        return Err(ConsensusError::AlreadyPresent(format!(
            "file already exists: {}",
            path.display()
        )));
    }

    let payload = bincode::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| ConsensusError::Serialization(e.to_string()))?;
    if payload.len() > u32::MAX as usize {
        return Err(ConsensusError::InvalidArgument(format!(
            "record payload too large: {} bytes",
            payload.len()
        )));
    }

    let parent = path.parent().ok_or_else(|| {
        ConsensusError::InvalidArgument(format!("invalid record path: {}", path.display()))
    })?;

    // Temp file in the same directory so the rename stays atomic.
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    let mut buf = Vec::with_capacity(payload.len() + 8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());

    let mut file = File::create(&temp_path)?;
    file.write_all(&buf)?;
    if sync == SyncMode::Sync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&temp_path, path)?;
    if sync == SyncMode::Sync {
        #[cfg(unix)]
        File::open(parent)?.sync_all()?;
    }

    Ok(())
}

/// Read and deserialize the record at `path`, verifying its CRC.
pub fn read<T: bincode::Decode<()>>(path: &Path) -> Result<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConsensusError::NotFound(format!(
                "record not found: {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    if bytes.len() < 8 {
        return Err(ConsensusError::Corruption(format!(
            "record truncated: {} bytes in {}",
            bytes.len(),
            path.display()
        )));
    }

    let payload_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    if bytes.len() != payload_len + 8 {
        return Err(ConsensusError::Corruption(format!(
            "record length mismatch in {}: header says {}, file holds {}",
            path.display(),
            payload_len,
            bytes.len().saturating_sub(8)
        )));
    }

    let payload = &bytes[4..4 + payload_len];
    let stored_crc = u32::from_le_bytes(bytes[4 + payload_len..].try_into().unwrap());
    let actual_crc = crc32c::crc32c(payload);
    if stored_crc != actual_crc {
        return Err(ConsensusError::Corruption(format!(
            "record checksum mismatch in {}: stored {:#010x}, computed {:#010x}",
            path.display(),
            stored_crc,
            actual_crc
        )));
    }

    let (record, _) = bincode::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| ConsensusError::Corruption(e.to_string()))?;
    Ok(record)
}
