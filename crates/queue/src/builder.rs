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

use crate::{DataConverter, FileQueue, FlushMode, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(root_dir: P, name: S) -> Self {
        Self {
            config: QueueConfig {
                root_dir: root_dir.into(),
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    pub fn dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.config.dequeue_timeout = Some(timeout);
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = Some(size);
        self
    }

    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &QueueConfig { &self.config }

    pub fn build<C: DataConverter>(self, converter: C) -> Result<FileQueue<C>> {
        FileQueue::open(self.config, converter)
    }
}
