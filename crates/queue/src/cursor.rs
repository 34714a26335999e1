// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memory-mapped cursor record.
//!
//! ## Binary Format
//!
//! ```text
//! ┌────────────────────┬────────────────────┬────────────────────┐
//! │ read_segment (8B)  │ read_offset (8B)   │ write_segment (8B) │
//! │ little-endian u64  │ little-endian u64  │ little-endian u64  │
//! └────────────────────┴────────────────────┴────────────────────┘
//! ```
//!
//! The read pair is always written together as one 16-byte region; the write
//! index is written alone. Updates go straight into the mapping, so they
//! survive a process crash even without an explicit flush.

use std::path::{Path, PathBuf};

use mmap_io::MemoryMappedFile;
use parking_lot::Mutex;
use snafu::ensure;
use tracing::debug;

use crate::{
    QueueError, Result,
    error::{CursorCorruptedSnafu, MmapSnafu},
};

/// Size of the cursor record in bytes.
pub const CURSOR_RECORD_SIZE: u64 = 24;

const READ_SEGMENT_POS: u64 = 0;
const WRITE_SEGMENT_POS: u64 = 16;

/// Read and write positions of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Segment the reader consumes from.
    pub read_segment:  u64,
    /// Next unread byte in the read segment.
    pub read_offset:   u64,
    /// Segment the writer appends to.
    pub write_segment: u64,
}

impl Cursor {
    fn encode(&self) -> [u8; CURSOR_RECORD_SIZE as usize] {
        let mut buf = [0u8; CURSOR_RECORD_SIZE as usize];
        buf[0..8].copy_from_slice(&self.read_segment.to_le_bytes());
        buf[8..16].copy_from_slice(&self.read_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.write_segment.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; CURSOR_RECORD_SIZE as usize]) -> Self {
        let field = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(word)
        };
        Self {
            read_segment:  field(0),
            read_offset:   field(8),
            write_segment: field(16),
        }
    }
}

fn mmap_error<E: std::fmt::Display>(path: &Path) -> impl FnOnce(E) -> QueueError + '_ {
    move |e| {
        MmapSnafu {
            path,
            message: e.to_string(),
        }
        .build()
    }
}

/// Durable cursor shared by the segment reader and writer.
///
/// Every mutation happens under the store's own lock: the writer takes it
/// when rotating, the reader when advancing its offset or rotating.
pub struct CursorStore {
    mmap:  MemoryMappedFile,
    path:  PathBuf,
    state: Mutex<Cursor>,
    sync:  bool,
}

impl CursorStore {
    /// Opens the cursor file, creating it zero-initialized if missing.
    ///
    /// With `sync` set, every update is flushed to disk before returning.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let (mmap, cursor) = if path.exists() {
            let mmap = MemoryMappedFile::open_rw(&path).map_err(mmap_error(&path))?;
            ensure!(
                mmap.len() >= CURSOR_RECORD_SIZE,
                CursorCorruptedSnafu {
                    path:   &path,
                    reason: format!(
                        "record is {} bytes, expected {CURSOR_RECORD_SIZE}",
                        mmap.len()
                    ),
                }
            );

            let mut buf = [0u8; CURSOR_RECORD_SIZE as usize];
            mmap.read_into(0, &mut buf).map_err(mmap_error(&path))?;
            (mmap, Cursor::decode(&buf))
        } else {
            let mmap = MemoryMappedFile::create_rw(&path, CURSOR_RECORD_SIZE)
                .map_err(mmap_error(&path))?;
            let cursor = Cursor::default();
            let store_bytes = cursor.encode();
            mmap.update_region(0, &store_bytes).map_err(mmap_error(&path))?;
            mmap.flush().map_err(mmap_error(&path))?;
            (mmap, cursor)
        };

        debug!(path = ?path, ?cursor, "Cursor loaded");

        Ok(Self {
            mmap,
            path,
            state: Mutex::new(cursor),
            sync,
        })
    }

    /// Current cursor.
    pub fn snapshot(&self) -> Cursor { *self.state.lock() }

    /// Path of the backing file.
    pub fn path(&self) -> &Path { &self.path }

    /// Persists a new read offset within the current read segment.
    pub fn move_read_offset(&self, offset: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.write_read_pair(state.read_segment, offset)?;
        state.read_offset = offset;
        Ok(())
    }

    /// Moves the reader to the next segment, resetting its offset to zero.
    /// Returns the new read segment index.
    pub fn increase_read_segment(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let next = state.read_segment + 1;
        self.write_read_pair(next, 0)?;
        state.read_segment = next;
        state.read_offset = 0;
        Ok(next)
    }

    /// Moves the writer to the next segment. Returns the new index.
    pub fn increase_write_segment(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let next = state.write_segment + 1;
        self.write_region(WRITE_SEGMENT_POS, &next.to_le_bytes())?;
        state.write_segment = next;
        Ok(next)
    }

    /// Flushes the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        let _state = self.state.lock();
        self.mmap.flush().map_err(mmap_error(&self.path))
    }

    fn write_read_pair(&self, segment: u64, offset: u64) -> Result<()> {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&segment.to_le_bytes());
        buf[8..16].copy_from_slice(&offset.to_le_bytes());
        self.write_region(READ_SEGMENT_POS, &buf)
    }

    fn write_region(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.mmap
            .update_region(offset, data)
            .map_err(mmap_error(&self.path))?;

        if self.sync {
            self.mmap
                .flush_range(offset, data.len() as u64)
                .map_err(mmap_error(&self.path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_zero_initialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("q.meta");

        let store = CursorStore::open(&path, true).unwrap();
        assert_eq!(store.snapshot(), Cursor::default());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), CURSOR_RECORD_SIZE);
    }

    #[test]
    fn test_updates_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("q.meta");

        {
            let store = CursorStore::open(&path, true).unwrap();
            store.increase_write_segment().unwrap();
            store.increase_write_segment().unwrap();
            store.move_read_offset(1024).unwrap();
            assert_eq!(store.increase_read_segment().unwrap(), 1);
            store.move_read_offset(512).unwrap();
        }

        let store = CursorStore::open(&path, false).unwrap();
        assert_eq!(store.snapshot(), Cursor {
            read_segment:  1,
            read_offset:   512,
            write_segment: 2,
        });
    }

    #[test]
    fn test_on_disk_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("q.meta");

        {
            let store = CursorStore::open(&path, true).unwrap();
            store.move_read_offset(0x0102).unwrap();
            store.increase_write_segment().unwrap();
            store.sync().unwrap();
        }

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[0..8], &0u64.to_le_bytes());
        assert_eq!(&raw[8..16], &0x0102u64.to_le_bytes());
        assert_eq!(&raw[16..24], &1u64.to_le_bytes());
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("q.meta");
        std::fs::write(&path, [0u8; 10]).unwrap();

        assert!(CursorStore::open(&path, true).is_err());
    }
}
