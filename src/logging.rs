//! Tracing setup: console output plus two append-only log files.
//!
//! - console: every event passing `RUST_LOG` (default `info`)
//! - `success.log`: this crate's INFO events, tagged `SUCCESS`
//! - `error.log`: this crate's ERROR events, tagged `ERROR`
//!
//! File lines look like `[2024-01-15T10:00:00.000Z] SUCCESS: copied: a -> b`.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::{
    fmt,
    fs::{self, File, OpenOptions},
    path::Path,
    sync::Mutex,
};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter, format::Writer},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");
pub const SUCCESS_LOG: &str = "success.log";
pub const ERROR_LOG: &str = "error.log";

/// Formats events as `[timestamp] TAG: message fields`.
#[derive(Clone, Copy, Debug)]
pub struct TaggedFormat {
    tag: &'static str,
}

impl TaggedFormat {
    pub const fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "[{}] {}: ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            self.tag
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn ours(meta: &Metadata<'_>) -> bool {
    meta.target().starts_with(CRATE_TARGET)
}

/// Open `name` under `dir` for appending, creating both as needed.
fn open_append(dir: &Path, name: &str) -> Result<File> {
    let path = dir.join(name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))
}

/// A file layer that only keeps this crate's events at exactly `level`.
fn file_layer<S, W>(writer: W, level: Level, tag: &'static str) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .event_format(TaggedFormat::new(tag))
        .with_filter(filter_fn(move |meta| ours(meta) && *meta.level() == level))
}

/// Install the global subscriber. Must be called once, before anything logs.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let success = open_append(log_dir, SUCCESS_LOG)?;
    let errors = open_append(log_dir, ERROR_LOG)?;

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(file_layer(Mutex::new(success), Level::INFO, "SUCCESS"))
        .with(file_layer(Mutex::new(errors), Level::ERROR, "ERROR"))
        .try_init()
        .context("installing tracing subscriber")?;

    install_panic_hook();
    Ok(())
}

/// Route panics through `tracing` so they reach error.log, then defer to
/// the default hook.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "unexpected panic");
        default_hook(info);
    }));
}

/// In-memory writer for asserting on log output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Buffer(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl std::io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> MakeWriter<'a> for Buffer {
    type Writer = Buffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
impl Buffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
