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

//! Side directory for bytes the queue could not deliver.
//!
//! Files are named `Fail_<Direction>_<YYYYMMDD_HHMMSS>-<uuid>` and hold the
//! raw bytes verbatim. Names never collide, so concurrent writers cannot
//! overwrite each other.

use std::{
    fmt,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use snafu::ResultExt;
use tracing::warn;
use uuid::Uuid;

use crate::{
    Result,
    error::{IoSnafu, QuarantineWriteSnafu},
};

/// Which side of the queue produced the quarantined bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Enqueue,
    Dequeue,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enqueue => f.write_str("Enqueue"),
            Self::Dequeue => f.write_str("Dequeue"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    /// Opens the quarantine directory, creating it if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    /// Writes `data` to a fresh file and returns its path.
    pub fn store(&self, data: &[u8], direction: Direction) -> Result<PathBuf> {
        let name = format!(
            "Fail_{direction}_{}-{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            Uuid::new_v4()
        );
        let path = self.dir.join(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .context(QuarantineWriteSnafu { path: &path })?;
        file.write_all(data)
            .context(QuarantineWriteSnafu { path: &path })?;
        file.sync_all()
            .context(QuarantineWriteSnafu { path: &path })?;

        warn!(
            path = %path.display(),
            %direction,
            bytes = data.len(),
            "Quarantined undeliverable bytes"
        );
        Ok(path)
    }

    /// Lists quarantined files, oldest name first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir).context(IoSnafu { path: &self.dir })? {
            let path = entry.context(IoSnafu { path: &self.dir })?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
