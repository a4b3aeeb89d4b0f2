//! Purpose: Process-wide diagnostics sink with a runtime-adjustable level.
//! Exports: `init`, `set_level`, `level`, `set_log_file`, `level_filter`.
//! Role: Shared by the CLI binary, the session API, and the C ABI.
//! Invariants: The subscriber is installed at most once; later calls only adjust it.
//! Invariants: Output goes to the log file when one is set, otherwise stderr.
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Registry, fmt, reload};

use crate::core::error::Error;

static FILTER: OnceLock<reload::Handle<LevelFilter, Registry>> = OnceLock::new();
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
static LEVEL: AtomicI32 = AtomicI32::new(0);

/// Maps a verbosity level onto a tracing filter.
pub fn level_filter(level: i32) -> LevelFilter {
    match level {
        i32::MIN..=-1 => LevelFilter::ERROR,
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2..=4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the subscriber on first use and applies `level`.
pub fn init(level: i32) {
    if FILTER.get().is_none() {
        let (filter, handle) = reload::Layer::new(level_filter(level));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(|| SinkWriter),
            )
            .try_init()
            .is_ok();
        if installed {
            let _ = FILTER.set(handle);
        }
    }
    set_level(level);
}

/// Sets the verbosity level and returns the previous one.
pub fn set_level(level: i32) -> i32 {
    let previous = LEVEL.swap(level, Ordering::SeqCst);
    if let Some(handle) = FILTER.get() {
        let _ = handle.reload(level_filter(level));
    }
    previous
}

pub fn level() -> i32 {
    LEVEL.load(Ordering::SeqCst)
}

/// Redirects diagnostics to `path` (appending), or back to stderr for `None`.
pub fn set_log_file(path: Option<&Path>) -> Result<(), Error> {
    let file = match path {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| Error::io(err, path).with_message("failed to open log file"))?,
        ),
        None => None,
    };
    let mut guard = LOG_FILE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = file;
    Ok(())
}

struct SinkWriter;

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = LOG_FILE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = LOG_FILE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => io::stderr().flush(),
        }
    }
}
