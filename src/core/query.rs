//! Purpose: Evaluated selection over one partition and access to its results.
//! Exports: `QueryHandle`, `ResultSet`.
//! Role: The condition is evaluated when the handle is built; accessors never re-run it.
//! Invariants: Hits are row numbers in ascending order; retrieval preserves that order.
use std::path::{Path, PathBuf};

use roaring::RoaringBitmap;

use crate::core::column::{ColumnValues, Qualified};
use crate::core::error::{Error, ErrorKind};
use crate::core::eval::evaluate;
use crate::core::expr::parse_condition;
use crate::core::partition::Partition;

#[derive(Debug)]
pub struct QueryHandle {
    partition: Partition,
    dir: PathBuf,
    select: Vec<String>,
    select_clause: String,
    where_clause: String,
    hits: RoaringBitmap,
}

impl QueryHandle {
    /// Opens the partition in `dir`, parses `where_clause` and evaluates it.
    /// `select` is an optional comma-separated list of column names.
    pub fn build(
        select: Option<&str>,
        dir: impl AsRef<Path>,
        where_clause: Option<&str>,
    ) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let partition = Partition::open(dir)?;

        let mut columns = Vec::new();
        for name in select.unwrap_or("").split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            columns.push(partition.require_column(name)?.name.clone());
        }

        let text = where_clause.unwrap_or("").trim();
        let condition = parse_condition(text)?;
        let hits = evaluate(&partition, &condition).map_err(|err| err.with_path(dir))?;
        tracing::debug!(
            partition = %partition.name(),
            condition = %condition,
            hits = hits.len(),
            "evaluated query"
        );

        Ok(Self {
            select_clause: columns.join(", "),
            where_clause: if text.is_empty() {
                String::new()
            } else {
                condition.to_string()
            },
            dir: dir.to_path_buf(),
            select: columns,
            hits,
            partition,
        })
    }

    pub fn result_rows(&self) -> u64 {
        self.hits.len()
    }

    pub fn result_columns(&self) -> usize {
        self.select.len()
    }

    pub fn select_clause(&self) -> &str {
        &self.select_clause
    }

    pub fn from_clause(&self) -> &Path {
        &self.dir
    }

    /// Canonical form of the condition; empty when every row is selected.
    pub fn where_clause(&self) -> &str {
        &self.where_clause
    }

    pub fn hits(&self) -> &RoaringBitmap {
        &self.hits
    }

    /// Values of `column` at the hit rows, converted to `T`.
    pub fn qualified<T: Qualified>(&self, column: &str) -> Result<Vec<T>, Error> {
        let values = self.partition.load_values(column)?;
        T::select(&values, &self.hits).map_err(|err| err.with_column(column))
    }

    pub fn qualified_ints(&self, column: &str) -> Result<Vec<i32>, Error> {
        self.qualified(column)
    }

    pub fn qualified_longs(&self, column: &str) -> Result<Vec<i64>, Error> {
        self.qualified(column)
    }

    pub fn qualified_floats(&self, column: &str) -> Result<Vec<f32>, Error> {
        self.qualified(column)
    }

    pub fn qualified_doubles(&self, column: &str) -> Result<Vec<f64>, Error> {
        self.qualified(column)
    }

    /// Cursor over hit rows of the selected columns.
    pub fn result_set(&self) -> Result<ResultSet, Error> {
        let mut columns = Vec::with_capacity(self.select.len());
        let mut masks = Vec::with_capacity(self.select.len());
        for name in &self.select {
            columns.push(self.partition.load_values(name)?);
            masks.push(self.partition.load_mask(name)?);
        }
        Ok(ResultSet {
            names: self.select.clone(),
            columns,
            masks,
            rows: self.hits.iter().collect(),
            cursor: None,
        })
    }

    pub fn destroy(self) {
        tracing::trace!(partition = %self.partition.name(), "released query");
    }
}

/// Row cursor produced by `QueryHandle::result_set`. Starts before the first
/// row; call `next` to advance.
#[derive(Debug)]
pub struct ResultSet {
    names: Vec<String>,
    columns: Vec<ColumnValues>,
    masks: Vec<RoaringBitmap>,
    rows: Vec<u32>,
    cursor: Option<usize>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
    }

    /// Advances to the next row; false once the rows are exhausted.
    pub fn next(&mut self) -> bool {
        let next = self.cursor.map_or(0, |pos| pos + 1);
        if next >= self.rows.len() {
            self.cursor = Some(self.rows.len());
            return false;
        }
        self.cursor = Some(next);
        true
    }

    /// Row number of the current row within the partition.
    pub fn row(&self) -> Option<u32> {
        self.cursor.and_then(|pos| self.rows.get(pos).copied())
    }

    pub fn is_null(&self, idx: usize) -> Result<bool, Error> {
        let (_, row) = self.current(idx)?;
        Ok(!self.masks[idx].contains(row))
    }

    pub fn get_i32(&self, idx: usize) -> Result<i32, Error> {
        self.cell(idx)
    }

    pub fn get_u32(&self, idx: usize) -> Result<u32, Error> {
        self.cell(idx)
    }

    pub fn get_f32(&self, idx: usize) -> Result<f32, Error> {
        self.cell(idx)
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64, Error> {
        let (values, row) = self.current(idx)?;
        values
            .value_as_f64(row as usize)
            .ok_or_else(|| self.out_of_range(idx))
    }

    /// Current value rendered as text; null cells render empty.
    pub fn get_string(&self, idx: usize) -> Result<String, Error> {
        if self.is_null(idx)? {
            return Ok(String::new());
        }
        let (values, row) = self.current(idx)?;
        values
            .display_value(row as usize)
            .ok_or_else(|| self.out_of_range(idx))
    }

    fn cell<T: Qualified>(&self, idx: usize) -> Result<T, Error> {
        let (values, row) = self.current(idx)?;
        let mut rows = RoaringBitmap::new();
        rows.insert(row);
        T::select(values, &rows)
            .map_err(|err| err.with_column(&self.names[idx]))?
            .pop()
            .ok_or_else(|| self.out_of_range(idx))
    }

    fn current(&self, idx: usize) -> Result<(&ColumnValues, u32), Error> {
        let Some(values) = self.columns.get(idx) else {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "column position {idx} is outside the {} selected column(s)",
                self.columns.len()
            )));
        };
        let Some(row) = self.row() else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("result set is not positioned on a row")
                .with_hint("Call next() before reading values."));
        };
        Ok((values, row))
    }

    fn out_of_range(&self, idx: usize) -> Error {
        Error::new(ErrorKind::Internal)
            .with_message("hit row is beyond the end of the column")
            .with_column(&self.names[idx])
    }
}
