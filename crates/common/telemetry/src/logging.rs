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
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter, layer::SubscriberExt};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// # Errors
/// Returns an error if deserialization fails.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Handle for changing the log filter at runtime.
///
/// Only set after `init_global_logging` has run.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty means stdout only.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Filter string such as `"info"` or `"info,filequeue=debug"`. Falls back
    /// to `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log stream (hourly rotation).
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log pipelines.
    Json,

    /// Human-readable lines, for consoles.
    #[default]
    Text,
}

/// Initialize stdout-only text logging with default options.
///
/// Keep the returned guards alive for as long as logs should be written.
#[must_use]
pub fn init_tracing_subscriber(app_name: &str) -> Vec<WorkerGuard> {
    init_global_logging(app_name, &LoggingOptions::default())
}

/// Initialize logging for unit tests.
///
/// Writes to `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) at
/// `UNITTEST_LOG_LEVEL` (default `debug`). Safe to call from every test; only
/// the first call does anything.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());

        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };
        let guards = init_global_logging("unittest", &opts);

        if let Ok(mut g) = GLOBAL_UT_LOG_GUARD.as_ref().lock() {
            *g = Some(guards);
        }

        tracing::info!("logs dir = {}", dir);
    });
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

const DEFAULT_LOG_TARGETS: &str = "info";

/// Initialize the global tracing subscriber.
///
/// Sets up, depending on `opts`:
/// - **Stdout Layer**: when `append_stdout` is true
/// - **File Layer**: `<dir>/<app_name>.*`, rotated hourly
/// - **Error File Layer**: `<dir>/<app_name>-err.*`, errors only
///
/// Only the first call takes effect. The returned guards flush the
/// non-blocking writers on drop.
///
/// # Panics
///
/// Panics if the log directory cannot be used, the level string does not
/// parse, or another global subscriber is already installed.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);

            let layer = tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(std::io::stdout().is_terminal());
            Some(match opts.log_format {
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Text => layer.boxed(),
            })
        } else {
            None
        };

        let file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name, opts, ""));
            guards.push(guard);

            let layer = tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false);
            Some(match opts.log_format {
                LogFormat::Json => layer.json().boxed(),
                LogFormat::Text => layer.boxed(),
            })
        };

        let err_file_logging_layer = if opts.dir.is_empty() {
            None
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(app_name, opts, "-err"));
            guards.push(guard);

            let layer = tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false);
            Some(match opts.log_format {
                LogFormat::Json => layer
                    .json()
                    .with_filter(filter::LevelFilter::ERROR)
                    .boxed(),
                LogFormat::Text => layer.with_filter(filter::LevelFilter::ERROR).boxed(),
            })
        };

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);

        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging get called twice?");

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}

fn rolling_appender(app_name: &str, opts: &LoggingOptions, suffix: &str) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(format!("{app_name}{suffix}"))
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        })
}
