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

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;

use crate::{Result, block::FRAME_SIZE, error::ConfigurationSnafu};

/// Default maximum segment size: 3 GiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 3 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, SmartDefault, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Parent directory of the queue; must already exist.
    #[default(PathBuf::from("./queue_data"))]
    pub root_dir:         PathBuf,
    /// Queue name, used as the sub-directory and cursor file name.
    #[default("default".to_string())]
    pub name:             String,
    /// A segment is rotated once it reaches this many bytes.
    #[default(DEFAULT_MAX_SEGMENT_SIZE)]
    pub max_segment_size: u64,
    /// `None` blocks until an item arrives.
    pub dequeue_timeout:  Option<Duration>,
    /// Read-ahead buffer size in bytes; `None` reads one frame at a time.
    pub read_buffer_size: Option<usize>,
    pub flush_mode:       FlushMode,
    /// Sleep between attempts while waiting for data.
    #[default(Duration::from_millis(1))]
    pub poll_interval:    Duration,
}

impl QueueConfig {
    /// Checks the configuration, failing with `Configuration` on the first
    /// invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.root_dir.is_dir(),
            ConfigurationSnafu {
                reason: format!(
                    "queue root {} does not exist or is not a directory",
                    self.root_dir.display()
                ),
            }
        );

        let name = self.name.as_str();
        ensure!(
            !name.trim().is_empty(),
            ConfigurationSnafu {
                reason: "queue name is empty",
            }
        );
        ensure!(
            name.trim() == name,
            ConfigurationSnafu {
                reason: format!("queue name {name:?} has leading or trailing whitespace"),
            }
        );
        ensure!(
            name != "." && name != ".." && !name.contains(['/', '\\']),
            ConfigurationSnafu {
                reason: format!("queue name {name:?} is not a plain file name"),
            }
        );

        ensure!(
            self.max_segment_size > 0,
            ConfigurationSnafu {
                reason: "max segment size must be positive",
            }
        );

        if let Some(size) = self.read_buffer_size {
            ensure!(
                size >= FRAME_SIZE,
                ConfigurationSnafu {
                    reason: format!("read buffer size {size} is smaller than a frame ({FRAME_SIZE})"),
                }
            );
        }

        if let FlushMode::Batch { bytes, .. } = self.flush_mode {
            ensure!(
                bytes > 0,
                ConfigurationSnafu {
                    reason: "batch flush threshold must be positive",
                }
            );
        }

        ensure!(
            !self.poll_interval.is_zero(),
            ConfigurationSnafu {
                reason: "poll interval must be positive",
            }
        );

        Ok(())
    }
}

/// When appended bytes are forced to stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Leave write-back to the OS.
    Async,
    /// Sync after every append and every cursor update.
    #[default]
    Sync,
    /// Sync once `bytes` are pending or `interval` has elapsed.
    Batch { bytes: usize, interval: Duration },
}
