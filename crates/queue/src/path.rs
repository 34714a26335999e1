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

//! On-disk layout of a queue directory:
//!
//! ```text
//! <root>/<name>/
//! ├── 00000000000000000000.queue   segment files
//! ├── 00000000000000000001.queue
//! ├── <name>.meta                  cursor record
//! └── error/                       quarantined bytes
//! ```

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

/// Extension of segment files.
pub const SEGMENT_EXTENSION: &str = "queue";

/// Name of the quarantine directory inside a queue directory.
pub const QUARANTINE_DIR: &str = "error";

/// Directory holding everything that belongs to queue `name`.
pub fn queue_dir<P: AsRef<Path>>(root: P, name: &str) -> PathBuf { root.as_ref().join(name) }

/// Segment file name: 20-digit zero-padded index plus extension.
pub fn segment_file_name(index: u64) -> String { format!("{index:020}.{SEGMENT_EXTENSION}") }

/// Full path to segment `index` inside `dir`.
pub fn segment_file_path<P: AsRef<Path>>(dir: P, index: u64) -> PathBuf {
    dir.as_ref().join(segment_file_name(index))
}

/// Full path to the cursor record: `<dir>/<name>.meta`.
pub fn meta_file_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.meta"))
}

/// Full path to the quarantine directory.
pub fn quarantine_dir<P: AsRef<Path>>(dir: P) -> PathBuf { dir.as_ref().join(QUARANTINE_DIR) }

/// Parses a segment index back out of a file name.
pub fn parse_segment_index(path: &Path) -> Option<u64> {
    if path.extension().and_then(|s| s.to_str()) != Some(SEGMENT_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 20 {
        return None;
    }
    stem.parse().ok()
}

/// Lists `(index, path)` of all segment files in `dir`, ordered by index.
pub fn scan_segment_files<P: AsRef<Path>>(dir: P) -> Result<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let path = entry.context(IoSnafu { path: dir })?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(index) = parse_segment_index(&path) {
            segments.push((index, path));
        }
    }

    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}
