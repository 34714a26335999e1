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

//! Queue façade and lifecycle management.
//!
//! The [`FileQueue`] is the entry point of the library. It owns:
//! - The cursor store and crash recovery at open
//! - One segment writer behind the enqueue lock
//! - One segment reader behind the dequeue lock
//! - The quarantine directory for undeliverable bytes
//!
//! ## Usage
//!
//! ```ignore
//! let queue = Arc::new(QueueBuilder::new("/var/spool", "events").build(Utf8Converter)?);
//!
//! queue.enqueue(&"hello".to_string())?;
//!
//! match queue.dequeue() {
//!     Ok(item) => println!("{item}"),
//!     Err(e) if e.is_timeout() => { /* nothing arrived in time */ }
//!     Err(e) => return Err(e),
//! }
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use crate::{
    Cursor, CursorStore, DataConverter, FlushMode, QueueConfig, Result,
    block::{self, FRAME_SIZE},
    error::{ConvertFailureSnafu, DequeueTimeoutSnafu, EncodeFailureSnafu, IoSnafu},
    path::{meta_file_path, quarantine_dir, queue_dir},
    quarantine::{Direction, Quarantine},
    recovery,
    segment::{SegmentReader, SegmentWriter},
};

/// A durable FIFO queue of `C::Item` values.
///
/// One enqueue and one dequeue may run at the same time; further callers on
/// either side wait for their turn. Share it between threads with `Arc`.
pub struct FileQueue<C: DataConverter> {
    config:     QueueConfig,
    dir:        PathBuf,
    converter:  C,
    cursor:     Arc<CursorStore>,
    writer:     Mutex<SegmentWriter>,
    reader:     Mutex<SegmentReader>,
    quarantine: Quarantine,
}

impl<C: DataConverter> FileQueue<C> {
    /// Opens (or creates) the queue `<root_dir>/<name>/`, repairing any state
    /// left behind by a crash.
    pub fn open(config: QueueConfig, converter: C) -> Result<Self> {
        config.validate()?;

        let dir = queue_dir(&config.root_dir, &config.name);
        std::fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;

        let quarantine = Quarantine::open(quarantine_dir(&dir))?;
        let cursor = Arc::new(CursorStore::open(
            meta_file_path(&dir, &config.name),
            config.flush_mode == FlushMode::Sync,
        )?);

        recovery::recover(&dir, &cursor, &quarantine)?;

        let writer = SegmentWriter::open(
            &dir,
            cursor.clone(),
            config.max_segment_size,
            config.flush_mode,
        )?;
        let reader = SegmentReader::open(&dir, cursor.clone(), config.read_buffer_size)?;

        info!(
            dir = %dir.display(),
            cursor = ?cursor.snapshot(),
            flush_mode = ?config.flush_mode,
            "Queue opened"
        );

        Ok(Self {
            config,
            dir,
            converter,
            cursor,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            quarantine,
        })
    }

    /// Serializes `item` and appends it to the tail of the queue.
    ///
    /// If the converter fails nothing is written. If the disk write fails,
    /// the serialized bytes are quarantined before the error is returned.
    pub fn enqueue(&self, item: &C::Item) -> Result<()> {
        let payload = self
            .converter
            .serialize(item)
            .context(EncodeFailureSnafu)?;
        let queue_data = block::encode(&payload);

        let mut writer = self.writer.lock();
        for frame in queue_data.chunks(FRAME_SIZE) {
            if let Err(e) = writer.append(frame) {
                drop(writer);
                error!(error = %e, bytes = payload.len(), "Enqueue failed");
                self.quarantine.store(&payload, Direction::Enqueue)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Removes the next item from the head of the queue and returns its raw
    /// queue-data, without decoding it.
    ///
    /// Blocks until a whole item is available. With a dequeue timeout
    /// configured, gives up after it with `DequeueTimeout`, handing back the
    /// frames already consumed; the remaining frames stay queued and are
    /// returned by the next call. The timeout counts from the moment this
    /// caller holds the dequeue lock, not from the call itself.
    pub fn dequeue_raw(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock();
        let start = Instant::now();
        let mut queue_data = BytesMut::new();

        if self.read_frames(&mut reader, &mut queue_data, start)? {
            return Ok(queue_data.freeze());
        }
        let elapsed = start.elapsed();
        debug!(?elapsed, partial = queue_data.len(), "Dequeue timed out");
        DequeueTimeoutSnafu {
            partial: queue_data.freeze(),
            elapsed,
        }
        .fail()
    }

    /// Like [`dequeue`](Self::dequeue), but never hands back half an item.
    ///
    /// When the timeout cuts an item off, the call keeps the dequeue lock and
    /// waits one more timeout for its remaining frames. If the item is still
    /// incomplete, the frames read so far are quarantined before the
    /// `DequeueTimeout` is returned, so its `partial` bytes need no further
    /// handling.
    pub fn dequeue_whole(&self) -> Result<C::Item> {
        let mut reader = self.reader.lock();
        let start = Instant::now();
        let mut queue_data = BytesMut::new();

        let complete = self.read_frames(&mut reader, &mut queue_data, start)?
            || (!queue_data.is_empty()
                && self.read_frames(&mut reader, &mut queue_data, Instant::now())?);
        drop(reader);

        if !complete {
            let elapsed = start.elapsed();
            if !queue_data.is_empty() {
                warn!(
                    ?elapsed,
                    partial = queue_data.len(),
                    "Item left incomplete, quarantining its frames"
                );
                self.quarantine.store(&queue_data, Direction::Dequeue)?;
            }
            return DequeueTimeoutSnafu {
                partial: queue_data.freeze(),
                elapsed,
            }
            .fail();
        }
        self.deserialize_queue_data(&queue_data)
    }

    /// Appends frames to `queue_data` until a footer frame arrives (returns
    /// `true`) or the timeout measured from `start` expires (returns `false`).
    fn read_frames(
        &self,
        reader: &mut SegmentReader,
        queue_data: &mut BytesMut,
        start: Instant,
    ) -> Result<bool> {
        loop {
            let frame = match reader.consume(FRAME_SIZE) {
                Ok(frame) => frame,
                Err(e) => {
                    if !queue_data.is_empty() {
                        self.quarantine.store(&queue_data[..], Direction::Dequeue)?;
                    }
                    return Err(e);
                }
            };

            match frame {
                Some(frame) => {
                    queue_data.extend_from_slice(&frame);
                    if block::is_footer_frame(&frame) {
                        return Ok(true);
                    }
                }
                None => {
                    if let Some(timeout) = self.config.dequeue_timeout
                        && start.elapsed() >= timeout
                    {
                        return Ok(false);
                    }
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    /// Removes the next item from the head of the queue.
    pub fn dequeue(&self) -> Result<C::Item> {
        let queue_data = self.dequeue_raw()?;
        self.deserialize_queue_data(&queue_data)
    }

    /// Decodes queue-data obtained from [`dequeue_raw`](Self::dequeue_raw),
    /// possibly stitched together from the partial bytes of a timeout.
    ///
    /// Data that fails to decode or convert is quarantined first, so it is
    /// never lost.
    pub fn deserialize_queue_data(&self, queue_data: &[u8]) -> Result<C::Item> {
        let payload = match block::decode(queue_data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Dequeued data failed to parse");
                self.quarantine.store(queue_data, Direction::Dequeue)?;
                return Err(e);
            }
        };

        match self.converter.deserialize(&payload) {
            Ok(item) => Ok(item),
            Err(source) => {
                warn!(error = %source, "Dequeued payload failed to convert");
                self.quarantine.store(&payload, Direction::Dequeue)?;
                Err(source).context(ConvertFailureSnafu)
            }
        }
    }

    /// Forces appended data and the cursor to disk.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()?;
        self.cursor.sync()
    }

    /// Snapshot of the read and write positions.
    pub fn cursor(&self) -> Cursor { self.cursor.snapshot() }

    pub fn queue_dir(&self) -> &Path { &self.dir }

    pub fn quarantine(&self) -> &Quarantine { &self.quarantine }

    pub fn config(&self) -> &QueueConfig { &self.config }

    pub fn converter(&self) -> &C { &self.converter }
}

impl<C: DataConverter> Drop for FileQueue<C> {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            error!(dir = %self.dir.display(), error = %e, "Failed to sync queue on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{BoxedError, BytesConverter, QueueBuilder, QueueError, Utf8Converter};

    fn open_utf8(root: &Path, timeout: Duration) -> FileQueue<Utf8Converter> {
        QueueBuilder::new(root, "test01")
            .dequeue_timeout(timeout)
            .flush_mode(FlushMode::Async)
            .build(Utf8Converter)
            .unwrap()
    }

    #[test]
    fn test_enqueue_dequeue_fifo() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(100));

        for i in 0..10 {
            queue.enqueue(&format!("item-{i}")).unwrap();
        }
        for i in 0..10 {
            assert_eq!(queue.dequeue().unwrap(), format!("item-{i}"));
        }
        assert!(queue.dequeue().unwrap_err().is_timeout());
    }

    #[test]
    fn test_empty_string_round_trips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(100));

        queue.enqueue(&String::new()).unwrap();
        assert_eq!(queue.dequeue().unwrap(), "");
    }

    #[test]
    fn test_zero_timeout_is_single_attempt() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::ZERO);

        let err = queue.dequeue().unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_broken());

        queue.enqueue(&"ready".to_string()).unwrap();
        assert_eq!(queue.dequeue().unwrap(), "ready");
    }

    #[test]
    fn test_timeout_mid_item_keeps_remaining_frames() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(50));

        let text: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let queue_data = block::encode(text.as_bytes());
        let (head, tail) = queue_data.split_at(2 * FRAME_SIZE);

        for frame in head.chunks(FRAME_SIZE) {
            queue.writer.lock().append(frame).unwrap();
        }

        let err = queue.dequeue_raw().unwrap_err();
        assert!(err.is_broken());
        let QueueError::DequeueTimeout { partial, elapsed } = err else {
            panic!("expected timeout");
        };
        assert_eq!(partial.len(), 2 * FRAME_SIZE);
        assert!(elapsed >= Duration::from_millis(50));

        for frame in tail.chunks(FRAME_SIZE) {
            queue.writer.lock().append(frame).unwrap();
        }

        let rest = queue.dequeue_raw().unwrap();
        let mut whole = partial.to_vec();
        whole.extend_from_slice(&rest);
        assert_eq!(queue.deserialize_queue_data(&whole).unwrap(), text);
    }

    #[test]
    fn test_dequeue_whole_waits_for_late_frames() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(open_utf8(temp_dir.path(), Duration::from_millis(200)));

        let text = "z".repeat(1500);
        let queue_data = block::encode(text.as_bytes());
        let (head, tail) = queue_data.split_at(FRAME_SIZE);
        queue.writer.lock().append(head).unwrap();

        let producer = {
            let queue = queue.clone();
            let tail = tail.to_vec();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(300));
                for frame in tail.chunks(FRAME_SIZE) {
                    queue.writer.lock().append(frame).unwrap();
                }
            })
        };

        assert_eq!(queue.dequeue_whole().unwrap(), text);
        producer.join().unwrap();
        assert!(queue.quarantine().list().unwrap().is_empty());
    }

    #[test]
    fn test_dequeue_whole_quarantines_abandoned_item() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(50));

        let queue_data = block::encode("y".repeat(1500).as_bytes());
        let head = &queue_data[..2 * FRAME_SIZE];
        for frame in head.chunks(FRAME_SIZE) {
            queue.writer.lock().append(frame).unwrap();
        }

        let err = queue.dequeue_whole().unwrap_err();
        assert!(err.is_broken());

        let files = queue.quarantine().list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), head);

        // Nothing queued: a plain timeout with no partial bytes.
        let err = queue.dequeue_whole().unwrap_err();
        assert!(err.is_timeout() && !err.is_broken());
    }

    #[test]
    fn test_timeout_starts_once_lock_is_held() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(open_utf8(temp_dir.path(), Duration::from_millis(400)));

        let spawn_consumer = |queue: Arc<FileQueue<Utf8Converter>>| {
            thread::spawn(move || queue.dequeue())
        };

        let first = spawn_consumer(queue.clone());
        thread::sleep(Duration::from_millis(20));
        let second = spawn_consumer(queue.clone());

        thread::sleep(Duration::from_millis(330));
        queue.enqueue(&"first".to_string()).unwrap();
        // The second consumer took the lock at about 350 ms.
        thread::sleep(Duration::from_millis(200));
        queue.enqueue(&"second".to_string()).unwrap();

        let mut received = vec![first.join().unwrap().unwrap(), second.join().unwrap().unwrap()];
        received.sort();
        assert_eq!(received, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_parse_failure_is_quarantined() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(50));

        let mut corrupted = block::encode(b"payload").to_vec();
        corrupted[block::FRAME_HEADER_SIZE] ^= 0xFF;

        let err = queue.deserialize_queue_data(&corrupted).unwrap_err();
        assert!(matches!(err, QueueError::ParseFailure { .. }));

        let files = queue.quarantine().list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), corrupted);
    }

    #[test]
    fn test_convert_failure_is_quarantined() {
        let temp_dir = tempfile::tempdir().unwrap();
        let raw = QueueBuilder::new(temp_dir.path(), "test01")
            .dequeue_timeout(Duration::from_millis(50))
            .build(BytesConverter)
            .unwrap();
        raw.enqueue(&vec![0xff, 0xfe, 0xfd]).unwrap();
        drop(raw);

        let queue = open_utf8(temp_dir.path(), Duration::from_millis(50));
        let err = queue.dequeue().unwrap_err();
        assert!(matches!(err, QueueError::ConvertFailure { .. }));

        let files = queue.quarantine().list().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), vec![0xff, 0xfe, 0xfd]);
    }

    struct RejectingConverter;

    impl DataConverter for RejectingConverter {
        type Item = u32;

        fn serialize(&self, _item: &u32) -> std::result::Result<Vec<u8>, BoxedError> {
            Err("not serializable".into())
        }

        fn deserialize(&self, _data: &[u8]) -> std::result::Result<u32, BoxedError> {
            Err("not deserializable".into())
        }
    }

    #[test]
    fn test_encode_failure_appends_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = QueueBuilder::new(temp_dir.path(), "test01")
            .build(RejectingConverter)
            .unwrap();

        let err = queue.enqueue(&7).unwrap_err();
        assert!(matches!(err, QueueError::EncodeFailure { .. }));

        let segment = queue.queue_dir().join("00000000000000000000.queue");
        assert_eq!(std::fs::metadata(segment).unwrap().len(), 0);
        assert!(queue.quarantine().list().unwrap().is_empty());
    }

    #[test]
    fn test_cursor_tracks_progress() {
        let temp_dir = tempfile::tempdir().unwrap();
        let queue = open_utf8(temp_dir.path(), Duration::from_millis(50));

        queue.enqueue(&"a".repeat(600)).unwrap();
        assert_eq!(queue.cursor(), Cursor::default());

        queue.dequeue().unwrap();
        assert_eq!(queue.cursor().read_offset, 2 * FRAME_SIZE as u64);
    }
}
