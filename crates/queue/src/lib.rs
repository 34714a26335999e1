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

//! Durable file-backed FIFO queue.
//!
//! Items are serialized by a [`DataConverter`], split into fixed 512-byte
//! frames by the [`block`] codec and appended to rotating segment files.
//! A memory-mapped [`cursor`] record keeps the read and write positions
//! across restarts, so a consumer resumes exactly where it stopped.
//!
//! ```ignore
//! let queue = QueueBuilder::new("/var/spool", "events").build(Utf8Converter)?;
//! queue.enqueue(&"hello".to_string())?;
//! assert_eq!(queue.dequeue()?, "hello");
//! ```

pub mod block;
pub mod builder;
mod checksum;
pub mod config;
pub mod converter;
pub mod cursor;
pub mod error;
pub mod path;
pub mod quarantine;
pub mod queue;
pub mod recovery;
pub mod segment;

pub use builder::QueueBuilder;
pub use config::{FlushMode, QueueConfig};
pub use converter::{BoxedError, BytesConverter, DataConverter, ObjectConverter, Utf8Converter};
pub use cursor::{Cursor, CursorStore};
pub use error::{QueueError, Result};
pub use quarantine::{Direction, Quarantine};
pub use queue::FileQueue;
pub use recovery::RecoveryReport;
pub use segment::{END_STAMP, SegmentReader, SegmentWriter};
