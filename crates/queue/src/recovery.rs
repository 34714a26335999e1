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

//! Crash recovery for the file queue.
//!
//! Runs once at open, before the segment writer and reader exist, and
//! reconciles the cursor record with the segment files:
//! 1. Reject a cursor whose read segment is ahead of its write segment
//! 2. Finish a rotation that wrote the end stamp but not the cursor
//! 3. Cut a torn tail off the write segment, quarantining the bytes
//! 4. Skip read segments that were deleted before the cursor moved
//! 5. Reject a read offset past the end of its segment
//! 6. Delete segments that are entirely behind the reader

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use snafu::{ResultExt, ensure};
use tracing::{debug, info, warn};

use crate::{
    Result,
    block::FRAME_SIZE,
    cursor::CursorStore,
    error::{CursorCorruptedSnafu, IoSnafu},
    path::{scan_segment_files, segment_file_path},
    quarantine::{Direction, Quarantine},
    segment::END_STAMP,
};

/// What recovery had to repair.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// An interrupted rotation was completed.
    pub completed_rotations: u64,
    /// Bytes cut off the end of the write segment.
    pub truncated_bytes:     u64,
    /// Where the truncated bytes were saved.
    pub quarantined:         Option<PathBuf>,
    /// Read segments that were already gone.
    pub skipped_segments:    u64,
    /// Indexes of stale segments that were deleted.
    pub deleted_segments:    Vec<u64>,
}

impl RecoveryReport {
    /// Returns `true` when nothing needed repair.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.completed_rotations == 0
            && self.truncated_bytes == 0
            && self.skipped_segments == 0
            && self.deleted_segments.is_empty()
    }
}

/// Reconciles the cursor with the segment files in `dir`.
pub fn recover(dir: &Path, cursor: &CursorStore, quarantine: &Quarantine) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let start = cursor.snapshot();

    debug!(dir = %dir.display(), ?start, "Starting queue recovery");

    ensure!(
        start.read_segment <= start.write_segment,
        CursorCorruptedSnafu {
            path:   cursor.path(),
            reason: format!(
                "read segment {} is ahead of write segment {}",
                start.read_segment, start.write_segment
            ),
        }
    );

    repair_write_segment(dir, cursor, quarantine, &mut report)?;
    repair_read_segment(dir, cursor, &mut report)?;
    delete_stale_segments(dir, cursor, &mut report)?;

    if report.is_clean() {
        debug!("Queue recovery found nothing to repair");
    } else {
        info!(?report, cursor = ?cursor.snapshot(), "Queue recovery repaired state");
    }
    Ok(report)
}

fn repair_write_segment(
    dir: &Path,
    cursor: &CursorStore,
    quarantine: &Quarantine,
    report: &mut RecoveryReport,
) -> Result<()> {
    loop {
        let index = cursor.snapshot().write_segment;
        let path = segment_file_path(dir, index);
        if !path.exists() {
            return Ok(());
        }

        let len = std::fs::metadata(&path).context(IoSnafu { path: &path })?.len();
        let tail_len = len % FRAME_SIZE as u64;
        if tail_len == 0 {
            return Ok(());
        }

        let tail = read_from(&path, len - tail_len)?;

        if tail.as_slice() == END_STAMP.as_slice() {
            let successor = segment_file_path(dir, index + 1);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&successor)
                .context(IoSnafu { path: &successor })?;
            let next = cursor.increase_write_segment()?;
            warn!(segment = index, next, "Completed interrupted rotation");
            report.completed_rotations += 1;
            continue;
        }

        // A half-written stamp carries no data; anything else might.
        if !END_STAMP.starts_with(&tail) {
            report.quarantined = Some(quarantine.store(&tail, Direction::Enqueue)?);
        }

        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        file.set_len(len - tail_len).context(IoSnafu { path: &path })?;
        file.sync_all().context(IoSnafu { path: &path })?;

        warn!(
            path = %path.display(),
            truncated = tail_len,
            new_len = len - tail_len,
            "Truncated torn tail of write segment"
        );
        report.truncated_bytes += tail_len;
        return Ok(());
    }
}

fn repair_read_segment(dir: &Path, cursor: &CursorStore, report: &mut RecoveryReport) -> Result<()> {
    loop {
        let state = cursor.snapshot();
        if state.read_segment >= state.write_segment
            || segment_file_path(dir, state.read_segment).exists()
        {
            break;
        }
        let next = cursor.increase_read_segment()?;
        warn!(
            missing = state.read_segment,
            next, "Read segment already deleted, advancing"
        );
        report.skipped_segments += 1;
    }

    let state = cursor.snapshot();
    let path = segment_file_path(dir, state.read_segment);
    let len = if path.exists() {
        std::fs::metadata(&path).context(IoSnafu { path: &path })?.len()
    } else {
        0
    };

    ensure!(
        state.read_offset <= len,
        CursorCorruptedSnafu {
            path:   cursor.path(),
            reason: format!(
                "read offset {} is past the end of segment {} ({len} bytes)",
                state.read_offset, state.read_segment
            ),
        }
    );
    ensure!(
        state.read_offset % FRAME_SIZE as u64 == 0,
        CursorCorruptedSnafu {
            path:   cursor.path(),
            reason: format!("read offset {} is not frame aligned", state.read_offset),
        }
    );
    Ok(())
}

fn delete_stale_segments(
    dir: &Path,
    cursor: &CursorStore,
    report: &mut RecoveryReport,
) -> Result<()> {
    let read_segment = cursor.snapshot().read_segment;
    for (index, path) in scan_segment_files(dir)? {
        if index >= read_segment {
            break;
        }
        std::fs::remove_file(&path).context(IoSnafu { path: &path })?;
        warn!(path = %path.display(), "Deleted stale segment");
        report.deleted_segments.push(index);
    }
    Ok(())
}

fn read_from(path: &Path, offset: u64) -> Result<Vec<u8>> {
    let mut file = File::open(path).context(IoSnafu { path })?;
    file.seek(SeekFrom::Start(offset))
        .context(IoSnafu { path })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context(IoSnafu { path })?;
    Ok(buf)
}
