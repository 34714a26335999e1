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

//! Segment files: append on the write side, consume on the read side.
//!
//! A segment that has been rotated away ends with [`END_STAMP`]. Rotation
//! creates the next segment file *before* writing the stamp, so a reader
//! that sees the stamp can always open the successor.
//!
//! ```text
//! 00000000000000000000.queue   [frame][frame]...[frame][_file_end_stamp_]
//! 00000000000000000001.queue   [frame][frame]...          <- write segment
//! ```

use std::{
    fs::{File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    Result,
    config::FlushMode,
    cursor::CursorStore,
    error::IoSnafu,
    path::segment_file_path,
};

/// Marker appended to a segment when the writer moves on to the next one.
pub const END_STAMP: &[u8; 16] = b"_file_end_stamp_";

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(IoSnafu { path })
}

/// Appends bytes to the current write segment and rotates when it is full.
pub struct SegmentWriter {
    dir:              PathBuf,
    path:             PathBuf,
    file:             File,
    size:             u64,
    max_segment_size: u64,
    flush_mode:       FlushMode,
    pending_bytes:    usize,
    last_flush:       Instant,
    cursor:           Arc<CursorStore>,
}

impl SegmentWriter {
    /// Opens the write segment named by the cursor, creating it if missing.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        cursor: Arc<CursorStore>,
        max_segment_size: u64,
        flush_mode: FlushMode,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = segment_file_path(&dir, cursor.snapshot().write_segment);
        let file = open_append(&path)?;
        let size = file.metadata().context(IoSnafu { path: &path })?.len();

        debug!(path = %path.display(), size, "Opened write segment");

        Ok(Self {
            dir,
            path,
            file,
            size,
            max_segment_size,
            flush_mode,
            pending_bytes: 0,
            last_flush: Instant::now(),
            cursor,
        })
    }

    /// Current write segment file.
    pub fn path(&self) -> &Path { &self.path }

    /// Bytes in the current write segment.
    pub fn size(&self) -> u64 { self.size }

    /// Appends `data`, flushes per the flush mode and rotates once the
    /// segment has reached its size limit.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .context(IoSnafu { path: &self.path })?;
        self.size += data.len() as u64;
        self.pending_bytes += data.len();

        self.handle_flush()?;

        if self.size >= self.max_segment_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Forces appended bytes to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data().context(IoSnafu { path: &self.path })?;
        self.pending_bytes = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    fn handle_flush(&mut self) -> Result<()> {
        match self.flush_mode {
            FlushMode::Sync => self.sync(),
            FlushMode::Batch { bytes, interval } => {
                if self.pending_bytes >= bytes || self.last_flush.elapsed() >= interval {
                    self.sync()?;
                }
                Ok(())
            }
            FlushMode::Async => Ok(()),
        }
    }

    fn rotate(&mut self) -> Result<()> {
        let current = self.cursor.snapshot().write_segment;
        let next_path = segment_file_path(&self.dir, current + 1);

        // Successor first: a reader must never follow a stamp to nothing.
        let next_file = open_append(&next_path)?;

        self.file
            .write_all(END_STAMP)
            .context(IoSnafu { path: &self.path })?;
        self.file.sync_data().context(IoSnafu { path: &self.path })?;

        let next = self.cursor.increase_write_segment()?;

        info!(
            from = %self.path.display(),
            to = %next_path.display(),
            size = self.size,
            "Rotated write segment"
        );

        self.size = next_file.metadata().context(IoSnafu { path: &next_path })?.len();
        self.file = next_file;
        self.path = next_path;
        self.pending_bytes = 0;
        self.last_flush = Instant::now();
        debug!(segment = next, "Write segment advanced");
        Ok(())
    }
}

/// Consumes fixed-size frames from the read segment.
///
/// With `read_buffer_size` set, each refill requests that many bytes and
/// later calls are served from memory. The returned frames are the same
/// either way.
pub struct SegmentReader {
    dir:              PathBuf,
    path:             PathBuf,
    file:             File,
    buffer:           BytesMut,
    read_buffer_size: Option<usize>,
    cursor:           Arc<CursorStore>,
}

impl SegmentReader {
    /// Opens the read segment named by the cursor.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        cursor: Arc<CursorStore>,
        read_buffer_size: Option<usize>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = segment_file_path(&dir, cursor.snapshot().read_segment);
        let file = File::open(&path).context(IoSnafu { path: &path })?;

        debug!(path = %path.display(), ?read_buffer_size, "Opened read segment");

        Ok(Self {
            dir,
            path,
            file,
            buffer: BytesMut::with_capacity(read_buffer_size.unwrap_or(0)),
            read_buffer_size,
            cursor,
        })
    }

    /// Current read segment file.
    pub fn path(&self) -> &Path { &self.path }

    /// Returns the next `frame_size` bytes, or `None` when no complete frame
    /// is available yet.
    ///
    /// A returned frame is already committed: the cursor's read offset has
    /// moved past it.
    pub fn consume(&mut self, frame_size: usize) -> Result<Option<Bytes>> {
        loop {
            if self.buffer.len() >= frame_size {
                return self.take(frame_size).map(Some);
            }

            let cursor = self.cursor.snapshot();
            let file_len = self
                .file
                .metadata()
                .context(IoSnafu { path: &self.path })?
                .len();
            let unread = file_len.saturating_sub(cursor.read_offset);
            if cursor.read_segment == cursor.write_segment && unread < frame_size as u64 {
                return Ok(None);
            }

            let target = self
                .read_buffer_size
                .map_or(frame_size, |size| size.max(frame_size));
            self.fill(cursor.read_offset, target)?;

            if self.buffer.len() >= frame_size {
                return self.take(frame_size).map(Some);
            }

            if self.buffer.as_ref() == END_STAMP.as_slice() {
                self.advance_segment()?;
                continue;
            }

            // Incomplete frame: rewind to the committed offset.
            self.buffer.clear();
            return Ok(None);
        }
    }

    fn take(&mut self, frame_size: usize) -> Result<Bytes> {
        let frame = self.buffer.split_to(frame_size).freeze();
        let offset = self.cursor.snapshot().read_offset + frame_size as u64;
        self.cursor.move_read_offset(offset)?;
        Ok(frame)
    }

    fn fill(&mut self, read_offset: u64, target: usize) -> Result<()> {
        let start = self.buffer.len();
        if start >= target {
            return Ok(());
        }

        self.file
            .seek(SeekFrom::Start(read_offset + start as u64))
            .context(IoSnafu { path: &self.path })?;

        self.buffer.resize(target, 0);
        let mut filled = start;
        while filled < target {
            match self.file.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e).context(IoSnafu { path: &self.path });
                }
            }
        }
        self.buffer.truncate(filled);
        Ok(())
    }

    fn advance_segment(&mut self) -> Result<()> {
        let current = self.cursor.snapshot().read_segment;
        let next_path = segment_file_path(&self.dir, current + 1);
        let next_file = File::open(&next_path).context(IoSnafu { path: &next_path })?;

        let consumed = std::mem::replace(&mut self.path, next_path);
        drop(std::mem::replace(&mut self.file, next_file));
        self.buffer.clear();

        if let Err(e) = std::fs::remove_file(&consumed) {
            warn!(path = %consumed.display(), error = %e, "Failed to delete consumed segment");
        }
        let next = self.cursor.increase_read_segment()?;

        info!(
            deleted = %consumed.display(),
            segment = next,
            "Rotated read segment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{
        block::{FRAME_SIZE, encode},
        path::{meta_file_path, scan_segment_files},
    };

    fn frame(tag: u8) -> Vec<u8> { vec![tag; FRAME_SIZE] }

    fn setup(
        max_segment_size: u64,
        read_buffer_size: Option<usize>,
    ) -> (tempfile::TempDir, SegmentWriter, SegmentReader) {
        let temp_dir = tempfile::tempdir().unwrap();
        let cursor =
            Arc::new(CursorStore::open(meta_file_path(temp_dir.path(), "t"), false).unwrap());
        let writer = SegmentWriter::open(
            temp_dir.path(),
            cursor.clone(),
            max_segment_size,
            FlushMode::Async,
        )
        .unwrap();
        let reader = SegmentReader::open(temp_dir.path(), cursor, read_buffer_size).unwrap();
        (temp_dir, writer, reader)
    }

    #[test]
    fn test_empty_segment_returns_none() {
        let (_dir, _writer, mut reader) = setup(1 << 20, None);
        assert!(reader.consume(FRAME_SIZE).unwrap().is_none());
    }

    #[test_case(None ; "unbuffered")]
    #[test_case(Some(FRAME_SIZE * 4) ; "read ahead")]
    #[test_case(Some(FRAME_SIZE * 3 + 100) ; "unaligned read ahead")]
    fn test_frames_in_order_across_rotations(read_buffer_size: Option<usize>) {
        let (dir, mut writer, mut reader) = setup(FRAME_SIZE as u64 * 3, read_buffer_size);

        for tag in 0..10u8 {
            writer.append(&frame(tag)).unwrap();
        }

        for tag in 0..10u8 {
            let got = reader.consume(FRAME_SIZE).unwrap().unwrap();
            assert_eq!(got.as_ref(), frame(tag).as_slice(), "frame {tag}");
        }
        assert!(reader.consume(FRAME_SIZE).unwrap().is_none());

        // 10 frames / 3 per segment: segments 0..=2 are consumed and gone.
        let indexes: Vec<u64> = scan_segment_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(indexes, vec![3]);
    }

    #[test]
    fn test_rotation_writes_stamp_and_creates_successor() {
        let (dir, mut writer, _reader) = setup(FRAME_SIZE as u64, None);

        writer.append(&frame(1)).unwrap();

        let first = std::fs::read(segment_file_path(dir.path(), 0)).unwrap();
        assert_eq!(first.len(), FRAME_SIZE + END_STAMP.len());
        assert!(first.ends_with(END_STAMP));
        assert!(segment_file_path(dir.path(), 1).exists());
        assert_eq!(writer.size(), 0);
    }

    #[test_case(None ; "unbuffered")]
    #[test_case(Some(FRAME_SIZE * 2) ; "read ahead")]
    fn test_partial_frame_is_not_consumed(read_buffer_size: Option<usize>) {
        let (_dir, mut writer, mut reader) = setup(1 << 20, read_buffer_size);

        let data = frame(7);
        writer.append(&data[..100]).unwrap();
        assert!(reader.consume(FRAME_SIZE).unwrap().is_none());

        writer.append(&data[100..]).unwrap();
        let got = reader.consume(FRAME_SIZE).unwrap().unwrap();
        assert_eq!(got.as_ref(), data.as_slice());
    }

    #[test]
    fn test_read_offset_tracks_consumed_frames() {
        let (_dir, mut writer, mut reader) = setup(1 << 20, Some(FRAME_SIZE * 8));

        for chunk in encode(&vec![9u8; 2000]).chunks(FRAME_SIZE) {
            writer.append(chunk).unwrap();
        }

        reader.consume(FRAME_SIZE).unwrap().unwrap();
        // Read-ahead may buffer more, but only the consumed frame is committed.
        assert_eq!(reader.cursor.snapshot().read_offset, FRAME_SIZE as u64);
    }

    #[test]
    fn test_reopen_resumes_from_cursor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let meta = meta_file_path(temp_dir.path(), "t");

        {
            let cursor = Arc::new(CursorStore::open(&meta, false).unwrap());
            let mut writer =
                SegmentWriter::open(temp_dir.path(), cursor.clone(), 1 << 20, FlushMode::Sync)
                    .unwrap();
            let mut reader = SegmentReader::open(temp_dir.path(), cursor.clone(), None).unwrap();
            writer.append(&frame(1)).unwrap();
            writer.append(&frame(2)).unwrap();
            reader.consume(FRAME_SIZE).unwrap().unwrap();
            cursor.sync().unwrap();
        }

        let cursor = Arc::new(CursorStore::open(&meta, false).unwrap());
        let mut reader = SegmentReader::open(temp_dir.path(), cursor, None).unwrap();
        let got = reader.consume(FRAME_SIZE).unwrap().unwrap();
        assert_eq!(got.as_ref(), frame(2).as_slice());
    }
}
