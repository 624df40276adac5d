use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, RowId};
use crate::index::spec::IndexSpec;
use crate::storage::layout::StorageLayout;

/// Write-ahead log for durability
pub struct WAL {
    pub file: File,
    pub position: u64,
    pub sync_mode: SyncMode,
    pub generation: u64,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum SyncMode {
    Immediate,  // fsync after every write
    Batch,      // fsync every megabyte
    None,       // Let OS handle it
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WALEntry {
    pub sequence: u64,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Insert { collection: String, row: RowId, doc: Document },
    Replace { collection: String, row: RowId, doc: Document },
    Counter { name: String, value: u64 },
    CreateIndex { collection: String, spec: IndexSpec },
    DropIndexes { collection: String },
}

const FRAME_HEADER: usize = 8; // len u32 + crc32 u32

impl WAL {
    pub fn open(storage: &StorageLayout, generation: u64, sync_mode: SyncMode) -> Result<Self> {
        let path = storage.wal_path(generation);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let position = file.metadata()?.len();

        Ok(WAL {
            file,
            position,
            sync_mode,
            generation,
            sequence: 0,
        })
    }

    pub fn append(&mut self, operation: Operation) -> Result<()> {
        let entry = WALEntry {
            sequence: self.sequence,
            operation,
            timestamp: Utc::now(),
        };

        let data = serde_json::to_vec(&entry)?;
        let len = data.len() as u32;
        let checksum = crc32fast::hash(&data);

        // One write per frame keeps a torn tail detectable
        let mut frame = Vec::with_capacity(FRAME_HEADER + data.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame.extend_from_slice(&data);
        self.file.write_all(&frame)?;

        let before = self.position;
        self.sequence += 1;
        self.position += frame.len() as u64;

        match self.sync_mode {
            SyncMode::Immediate => self.file.sync_data()?,
            SyncMode::Batch if before / (1024 * 1024) != self.position / (1024 * 1024) => {
                self.file.sync_data()?
            }
            _ => {}
        }

        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Start the next generation; the caller deletes older files once a
    /// snapshot covers them.
    pub fn rotate(&mut self, storage: &StorageLayout) -> Result<()> {
        self.sync()?;
        let next = WAL::open(storage, self.generation + 1, self.sync_mode)?;
        *self = next;
        Ok(())
    }

    /// Read every intact entry of one WAL file. A torn or corrupt tail ends
    /// the replay with a warning; `valid_len` marks where it starts.
    pub fn read_entries(path: &Path) -> Result<WalReplay> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut header = [0u8; FRAME_HEADER];
            match read_full(&mut reader, &mut header)? {
                0 => break,
                n if n < FRAME_HEADER => {
                    warn!(path = %path.display(), "truncated WAL frame header, stopping replay");
                    break;
                }
                _ => {}
            }

            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            // Never trust a length the file cannot hold
            if len > file_len.saturating_sub(offset + FRAME_HEADER as u64) {
                warn!(path = %path.display(), len, "WAL frame runs past end of file, stopping replay");
                break;
            }

            let mut data = vec![0u8; len as usize];
            if read_full(&mut reader, &mut data)? < data.len() {
                warn!(path = %path.display(), "truncated WAL frame, stopping replay");
                break;
            }
            if crc32fast::hash(&data) != expected {
                warn!(path = %path.display(), "WAL checksum mismatch, stopping replay");
                break;
            }

            let entry: WALEntry = serde_json::from_slice(&data).map_err(|e| {
                Error::new(ErrorKind::FatalStore, format!("corrupt WAL entry: {}", e))
            })?;
            entries.push(entry);
            offset += FRAME_HEADER as u64 + len;
        }

        Ok(WalReplay {
            entries,
            valid_len: offset,
            torn: offset < file_len,
        })
    }

    /// Cut a log back to its intact prefix so later appends stay replayable.
    pub fn truncate(path: &Path, len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Outcome of reading one WAL file.
#[derive(Debug)]
pub struct WalReplay {
    pub entries: Vec<WALEntry>,
    pub valid_len: u64,
    pub torn: bool,
}

/// Like `read_exact` but reports how much was read before EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
