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

use std::{io, path::PathBuf, time::Duration};

use bytes::Bytes;
use snafu::Snafu;

use crate::converter::BoxedError;

/// Queue operation errors.
///
/// Variants that carry bytes (`ParseFailure`, `DequeueTimeout`) hand the
/// offending data back to the caller so nothing read from disk is lost.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Invalid configuration; no queue instance was created.
    #[snafu(display("Invalid queue configuration: {reason}"))]
    Configuration {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The converter could not serialize the item. Nothing was appended.
    #[snafu(display("Failed to serialize item: {source}"))]
    EncodeFailure {
        source: BoxedError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Queue-data failed structural or checksum validation.
    #[snafu(display("Failed to parse queue data ({} bytes): {reason}", queue_data.len()))]
    ParseFailure {
        reason:     String,
        queue_data: Bytes,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },

    /// The payload decoded but the converter rejected it.
    #[snafu(display("Failed to deserialize item: {source}"))]
    ConvertFailure {
        source: BoxedError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// No complete item arrived in time. `partial` holds the frames already
    /// consumed for the in-flight item; the rest is still on disk.
    #[snafu(display("Dequeue timed out after {elapsed:?} with {} partial bytes", partial.len()))]
    DequeueTimeout { partial: Bytes, elapsed: Duration },

    /// Filesystem I/O failure.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Memory mapping operation failed.
    #[snafu(display("Mmap operation failed on {}: {message}", path.display()))]
    Mmap {
        path:    PathBuf,
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    /// The cursor record contradicts itself or the segment files.
    #[snafu(display("Cursor {} corrupted: {reason}", path.display()))]
    CursorCorrupted {
        path:   PathBuf,
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Writing to the quarantine directory failed.
    #[snafu(display("Failed to quarantine bytes to {}: {source}", path.display()))]
    QuarantineWrite {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl QueueError {
    /// Returns `true` for a dequeue timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool { matches!(self, Self::DequeueTimeout { .. }) }

    /// Returns `true` when a timeout interrupted an item half-way, i.e. some
    /// of its frames were already consumed.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::DequeueTimeout { partial, .. } if !partial.is_empty())
    }

    /// Raw bytes carried by the error: the partial frames of a timeout or the
    /// rejected queue-data of a parse failure.
    #[must_use]
    pub const fn raw_data(&self) -> Option<&Bytes> {
        match self {
            Self::DequeueTimeout { partial, .. } => Some(partial),
            Self::ParseFailure { queue_data, .. } => Some(queue_data),
            _ => None,
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
