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

use std::{
    io::{BufRead, Write},
    path::PathBuf,
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use filequeue::{FileQueue, QueueConfig, Utf8Converter, path::scan_segment_files};
use filequeue_common_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};
use snafu::{ResultExt, Whatever, whatever};

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "filequeue",
about= "Inspect and drive a durable file-backed queue",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(flatten)]
    queue: QueueArgs,

    /// Log filter, e.g. `info` or `filequeue=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct QueueArgs {
    /// JSON file holding a full queue configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Parent directory of the queue.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Queue name.
    #[arg(long, global = true)]
    name: Option<String>,
}

impl QueueArgs {
    fn load(&self) -> Result<QueueConfig, Whatever> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_whatever_context(|_| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_whatever_context(|_| format!("parsing {}", path.display()))?
            }
            None => QueueConfig::default(),
        };
        if let Some(root) = &self.root {
            config.root_dir.clone_from(root);
        }
        if let Some(name) = &self.name {
            config.name.clone_from(name);
        }
        Ok(config)
    }

    fn open(&self, timeout: Option<Duration>) -> Result<FileQueue<Utf8Converter>, Whatever> {
        let mut config = self.load()?;
        if timeout.is_some() {
            config.dequeue_timeout = timeout;
        }
        std::fs::create_dir_all(&config.root_dir)
            .with_whatever_context(|_| format!("creating {}", config.root_dir.display()))?;
        FileQueue::open(config, Utf8Converter).whatever_context("opening queue")
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Enqueue(EnqueueArgs),
    Dequeue(DequeueArgs),
    Stat(StatArgs),
    Quarantine(QuarantineArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Append items to the queue. Without arguments, every line of stdin is one item.
Examples:

filequeue enqueue hello world
cat events.txt | filequeue --name events enqueue

")]
struct EnqueueArgs {
    items: Vec<String>,
}

impl EnqueueArgs {
    fn run(&self, queue: &QueueArgs) -> Result<(), Whatever> {
        let queue = queue.open(None)?;
        let mut count = 0usize;

        if self.items.is_empty() {
            for line in std::io::stdin().lock().lines() {
                let line = line.whatever_context("reading stdin")?;
                queue.enqueue(&line).whatever_context("enqueue failed")?;
                count += 1;
            }
        } else {
            for item in &self.items {
                queue.enqueue(item).whatever_context("enqueue failed")?;
                count += 1;
            }
        }

        queue.sync().whatever_context("sync failed")?;
        eprintln!("enqueued {count} item(s)");
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove items from the head of the queue and print one per line.
Examples:

filequeue dequeue
filequeue dequeue --count 10 --timeout-ms 500

")]
struct DequeueArgs {
    /// Maximum number of items to take.
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Give up waiting for the next item after this long.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

impl DequeueArgs {
    fn run(&self, queue: &QueueArgs) -> Result<(), Whatever> {
        let queue = queue.open(Some(Duration::from_millis(self.timeout_ms)))?;
        let mut stdout = std::io::stdout().lock();

        for _ in 0..self.count {
            match queue.dequeue_whole() {
                Ok(item) => writeln!(stdout, "{item}").whatever_context("writing stdout")?,
                Err(e) if e.is_timeout() && !e.is_broken() => break,
                Err(e) if e.is_broken() => {
                    whatever!("item left incomplete, its frames were quarantined: {e}")
                }
                Err(e) => whatever!("dequeue failed: {e}"),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the cursor and the segment files of the queue.
Examples:

filequeue --root /var/spool --name events stat

")]
struct StatArgs {}

impl StatArgs {
    fn run(&self, queue: &QueueArgs) -> Result<(), Whatever> {
        let queue = queue.open(None)?;
        let cursor = queue.cursor();

        println!("queue:         {}", queue.queue_dir().display());
        println!("read segment:  {}", cursor.read_segment);
        println!("read offset:   {}", cursor.read_offset);
        println!("write segment: {}", cursor.write_segment);

        let segments =
            scan_segment_files(queue.queue_dir()).whatever_context("listing segments")?;
        for (index, path) in segments {
            let len = std::fs::metadata(&path)
                .with_whatever_context(|_| format!("reading {}", path.display()))?
                .len();
            println!("segment {index:>6}: {len} bytes");
        }

        let quarantined = queue
            .quarantine()
            .list()
            .whatever_context("listing quarantine")?;
        println!("quarantined:   {}", quarantined.len());
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

List files in the quarantine directory.
Examples:

filequeue quarantine

")]
struct QuarantineArgs {}

impl QuarantineArgs {
    fn run(&self, queue: &QueueArgs) -> Result<(), Whatever> {
        let queue = queue.open(None)?;
        for path in queue
            .quarantine()
            .list()
            .whatever_context("listing quarantine")?
        {
            let len = std::fs::metadata(&path)
                .with_whatever_context(|_| format!("reading {}", path.display()))?
                .len();
            println!("{len:>10}  {}", path.display());
        }
        Ok(())
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();

    let logging = LoggingOptions {
        level: Some(cli.log_level.clone()),
        log_format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        ..Default::default()
    };
    let _guards = init_global_logging("filequeue", &logging);
    set_panic_hook();

    match &cli.commands {
        Commands::Enqueue(args) => args.run(&cli.queue),
        Commands::Dequeue(args) => args.run(&cli.queue),
        Commands::Stat(args) => args.run(&cli.queue),
        Commands::Quarantine(args) => args.run(&cli.queue),
    }
}
