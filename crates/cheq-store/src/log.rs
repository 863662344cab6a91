use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::WriteBatch;
use crate::entity::EntityKind;
use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryEntityStore;
use crate::traits::EntityStore;

/// Flush/sync strategy for the store log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every committed batch (safest, highest latency).
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

/// Configuration for the [`LogEntityStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes payload CRC + 4 bytes header CRC.
const HEADER_SIZE: usize = 12;

struct LogWriter {
    writer: BufWriter<File>,
    /// End of the last complete frame.
    offset: u64,
}

/// Durable entity store backed by an append-only batch log.
///
/// On-disk format, one frame per committed [`WriteBatch`]:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [4 bytes: CRC32 of the preceding 8 header bytes (little-endian u32)]
/// [N bytes: payload (bincode-serialized WriteBatch)]
/// ```
///
/// The log is replayed into an [`InMemoryEntityStore`] on open, which then
/// serves all reads. A torn final frame (crash mid-append) is dropped and
/// the file truncated back to the last complete frame. A frame is torn only
/// when the file ends inside it: a partial header, or a checksummed header
/// whose payload runs past the end of the file. A damaged frame anywhere
/// else aborts the open, since skipping it would silently lose committed
/// writes.
pub struct LogEntityStore {
    path: PathBuf,
    tables: InMemoryEntityStore,
    writer: Mutex<LogWriter>,
    config: LogConfig,
}

impl LogEntityStore {
    /// Open (or create) a store log at the given path.
    pub fn open(path: &Path, config: LogConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tables = InMemoryEntityStore::new();
        let data = if path.exists() {
            fs::read(path)?
        } else {
            Vec::new()
        };
        let (batches, valid_len) = decode_frames(&data)?;
        let frame_count = batches.len();
        for batch in batches {
            tables.apply(batch)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        if valid_len < data.len() as u64 {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = data.len(),
                "dropping torn tail frame from store log"
            );
            file.set_len(valid_len)?;
        }

        info!(
            path = %path.display(),
            frames = frame_count,
            records = tables.total_len()?,
            "store log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            tables,
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                offset: valid_len,
            }),
            config,
        })
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end offset of the log.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.writer.lock().map_err(|_| StoreError::LockPoisoned)?.offset)
    }

    /// Number of records in one table.
    pub fn len(&self, kind: EntityKind) -> StoreResult<usize> {
        self.tables.len(kind)
    }

    /// Rewrite the log as a single frame holding the current state.
    pub fn compact(&self) -> StoreResult<()> {
        let mut w = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        let snapshot = self.tables.snapshot()?;
        let frame = encode_frame(&snapshot)?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = frame.len() as u64;

        info!(records = snapshot.len(), bytes = w.offset, "store log compacted");
        Ok(())
    }

    fn append_frame(&self, w: &mut LogWriter, frame: &[u8]) -> std::io::Result<()> {
        w.writer.write_all(frame)?;
        w.writer.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            w.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Cut the file back to the last complete frame after a failed append.
    fn rollback(&self, w: &mut LogWriter) -> std::io::Result<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        // Discard unflushed bytes instead of letting drop write them.
        let _ = stale.into_parts();
        w.writer.get_ref().set_len(w.offset)?;
        Ok(())
    }
}

impl EntityStore for LogEntityStore {
    fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.tables.get(kind, key)
    }

    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let frame = encode_frame(&batch)?;

        let mut w = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Err(e) = self.append_frame(&mut w, &frame) {
            if let Err(rollback) = self.rollback(&mut w) {
                warn!(error = %rollback, "failed to roll back partial log frame");
            }
            return Err(e.into());
        }
        let frame_offset = w.offset;
        w.offset += frame.len() as u64;

        debug!(offset = frame_offset, writes = batch.len(), "batch committed");
        // Still under the writer lock, so `compact` never snapshots tables
        // that lag behind the log.
        self.tables.apply(batch)
    }

    fn keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        self.tables.keys(kind)
    }
}

fn encode_frame(batch: &WriteBatch) -> StoreResult<Vec<u8>> {
    let payload =
        bincode::serialize(batch).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization("batch exceeds 4 GiB frame limit".into()))?;
    let crc = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    let header_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&header_crc.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode every complete frame. Returns the batches and the byte length of
/// the valid prefix.
fn decode_frames(data: &[u8]) -> StoreResult<(Vec<WriteBatch>, u64)> {
    let mut batches = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if data.len() - offset < HEADER_SIZE {
            break;
        }
        let header = &data[offset..offset + HEADER_SIZE];
        let header_crc = crc32fast::hash(&header[..8]);
        if header_crc != read_u32(header, 8) {
            return Err(StoreError::CorruptFrame {
                offset: offset as u64,
                reason: "header checksum mismatch".into(),
            });
        }
        let length = read_u32(header, 0) as usize;
        let expected_crc = read_u32(header, 4);
        if length == 0 {
            return Err(StoreError::CorruptFrame {
                offset: offset as u64,
                reason: "empty frame".into(),
            });
        }

        let end = offset + HEADER_SIZE + length;
        if end > data.len() {
            // Torn final write.
            break;
        }

        let payload = &data[offset + HEADER_SIZE..end];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            if end == data.len() {
                // Torn final write.
                break;
            }
            return Err(StoreError::CorruptFrame {
                offset: offset as u64,
                reason: format!("crc mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"),
            });
        }

        let batch = bincode::deserialize::<WriteBatch>(payload).map_err(|e| {
            StoreError::CorruptFrame {
                offset: offset as u64,
                reason: e.to_string(),
            }
        })?;
        batches.push(batch);
        offset = end;
    }

    Ok((batches, offset as u64))
}
