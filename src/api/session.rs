//! Purpose: Session facade that owns configuration, diagnostics, and the write buffer.
//! Exports: `Session`, `ApiResult`.
//! Role: Single entry point used by the CLI, the self-test, and the C ABI.
//! Invariants: Buffered values reach disk only through `flush_buffer`.
//! Invariants: Index specs resolve as explicit, per-partition config, metadata, config, default.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use crate::core::buffer::WriteBuffer;
use crate::core::column::ColumnValues;
use crate::core::config::Config;
use crate::core::error::Error;
use crate::core::index::{self, IndexSpec};
use crate::core::partition::{self, Partition, partition_name};
use crate::core::query::QueryHandle;
use crate::logging;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Debug)]
pub struct Session {
    config: Config,
    buffer: WriteBuffer,
    verbose: i32,
    log_file: Option<PathBuf>,
}

impl Session {
    /// Reads the resource file (see `Config::load`) and starts diagnostics at
    /// the configured verbosity.
    pub fn init(conffile: Option<&Path>) -> ApiResult<Self> {
        let config = Config::load(conffile)?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> ApiResult<Self> {
        let verbose = config.verboseness()?;
        logging::init(verbose);
        let mut log_file = config.log_file();
        if let Some(path) = &log_file {
            if let Err(err) = logging::set_log_file(Some(path.as_path())) {
                tracing::warn!(error = %err, "continuing with diagnostics on stderr");
                log_file = None;
            }
        }
        tracing::debug!(
            rc = ?config.source().map(Path::display),
            verbose,
            "session initialized"
        );
        Ok(Self {
            config,
            buffer: WriteBuffer::new(),
            verbose,
            log_file,
        })
    }

    /// Sets the verbosity level and returns the previous one.
    pub fn set_verbose_level(&mut self, level: i32) -> i32 {
        let previous = self.verbose;
        self.verbose = level;
        logging::set_level(level);
        previous
    }

    pub fn verbose_level(&self) -> i32 {
        self.verbose
    }

    /// Sends diagnostics to `path`, or back to stderr for `None`.
    pub fn set_log_file(&mut self, path: Option<&Path>) -> ApiResult<()> {
        logging::set_log_file(path)?;
        self.log_file = path.map(Path::to_path_buf);
        Ok(())
    }

    /// Current diagnostics file; `None` while writing to stderr.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn add_values(
        &mut self,
        column: &str,
        values: impl Into<ColumnValues>,
        start: usize,
    ) -> ApiResult<()> {
        self.buffer.add_values(column, values.into(), start)
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.rows()
    }

    /// Appends buffered rows to the partition in `dir`; returns the rows written.
    pub fn flush_buffer(&mut self, dir: impl AsRef<Path>) -> ApiResult<u64> {
        self.buffer.flush(dir.as_ref())
    }

    pub fn rows_in_partition(&self, dir: impl AsRef<Path>) -> ApiResult<u64> {
        partition::rows_in_partition(dir)
    }

    pub fn columns_in_partition(&self, dir: impl AsRef<Path>) -> ApiResult<usize> {
        partition::columns_in_partition(dir)
    }

    /// Effective index specification for the partition in `dir`.
    pub fn index_spec(&self, dir: &Path, explicit: Option<&str>) -> ApiResult<IndexSpec> {
        let partition = Partition::open(dir)?;
        let name = match partition.name() {
            "" => partition_name(dir),
            name => name.to_string(),
        };
        IndexSpec::resolve([
            explicit,
            self.config.partition_index(&name),
            partition.meta().index.as_deref(),
            self.config.default_index(),
        ])
    }

    pub fn build_indexes(&self, dir: impl AsRef<Path>, spec: Option<&str>) -> ApiResult<usize> {
        let dir = dir.as_ref();
        let spec = self.index_spec(dir, spec)?;
        index::build_indexes(dir, spec)
    }

    pub fn build_index(
        &self,
        dir: impl AsRef<Path>,
        column: &str,
        spec: Option<&str>,
    ) -> ApiResult<bool> {
        let dir = dir.as_ref();
        let spec = self.index_spec(dir, spec)?;
        index::build_index(dir, column, spec)
    }

    pub fn purge_indexes(&self, dir: impl AsRef<Path>) -> ApiResult<()> {
        index::purge_indexes(dir.as_ref())
    }

    pub fn purge_index(&self, dir: impl AsRef<Path>, column: &str) -> ApiResult<()> {
        index::purge_index(dir.as_ref(), column)
    }

    pub fn build_query(
        &self,
        select: Option<&str>,
        dir: impl AsRef<Path>,
        where_clause: Option<&str>,
    ) -> ApiResult<QueryHandle> {
        QueryHandle::build(select, dir, where_clause)
    }

    /// Ends the session; unflushed rows are discarded.
    pub fn cleanup(self) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                rows = self.buffer.rows(),
                "discarding unflushed rows at cleanup"
            );
        }
    }
}
