// In-memory write buffer of named columns, appended to a partition on flush.
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use roaring::RoaringBitmap;

use crate::core::column::ColumnValues;
use crate::core::error::{Error, ErrorKind};
use crate::core::partition::{
    ColumnMeta, INDEX_SUFFIX, MASK_SUFFIX, MetaLock, PartitionMeta, full_mask, partition_name,
    read_mask, write_mask,
};

#[derive(Debug)]
struct BufferedColumn {
    name: String,
    values: ColumnValues,
    valid: RoaringBitmap,
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    columns: Vec<BufferedColumn>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    /// Number of rows a flush would append.
    pub fn rows(&self) -> usize {
        self.columns
            .iter()
            .map(|col| col.values.len())
            .max()
            .unwrap_or(0)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|col| col.name.as_str())
    }

    /// Places `values` at rows `start..` of the named column.
    pub fn add_values(
        &mut self,
        name: &str,
        values: ColumnValues,
        start: usize,
    ) -> Result<(), Error> {
        let name = name.trim();
        if !is_valid_column_name(name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("\"{name}\" is not a valid column name"))
                .with_hint("Column names start with a letter or '_' and use letters, digits, '_' or '.'."));
        }
        let end = start + values.len();
        if end > u32::MAX as usize {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("row position exceeds the supported range")
                .with_column(name));
        }

        let position = self
            .columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name));
        let idx = match position {
            Some(idx) => idx,
            None => {
                self.columns.push(BufferedColumn {
                    name: name.to_string(),
                    values: ColumnValues::nulls(values.column_type(), 0),
                    valid: RoaringBitmap::new(),
                });
                self.columns.len() - 1
            }
        };
        let column = &mut self.columns[idx];
        column
            .values
            .overlay(start, &values)
            .map_err(|err| err.with_column(&column.name))?;
        if end > start {
            column.valid.insert_range(start as u32..end as u32);
        }
        tracing::trace!(column = %column.name, start, count = values.len(), "buffered values");
        Ok(())
    }

    pub fn clear(&mut self) {
        self.columns.clear();
    }

    /// Appends the buffered rows to the partition in `dir`, creating it when
    /// missing. Returns the number of rows appended.
    pub fn flush(&mut self, dir: &Path) -> Result<u64, Error> {
        let new_rows = self.rows();
        if new_rows == 0 {
            return Ok(0);
        }

        let mut lock = MetaLock::acquire(dir)?;
        let mut meta = lock.read_meta()?.unwrap_or_else(|| {
            let mut meta = PartitionMeta::new(partition_name(dir));
            meta.description = "data written by bitsel".to_string();
            meta
        });
        let old_rows = meta.rows;
        let total = old_rows + new_rows as u64;
        if total > u32::MAX as u64 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("partition would exceed the supported row count")
                .with_path(dir));
        }

        for col in &self.columns {
            if let Some(existing) = meta.column(&col.name) {
                if existing.column_type != col.values.column_type() {
                    return Err(Error::new(ErrorKind::Type)
                        .with_message(format!(
                            "partition stores {} as {}, buffer holds {}",
                            existing.name,
                            existing.column_type,
                            col.values.column_type()
                        ))
                        .with_column(&col.name)
                        .with_path(dir));
                }
            }
        }

        // Everything that can reject the partition is checked before the
        // first byte is written.
        let mut existing = Vec::with_capacity(meta.columns.len());
        for col in &meta.columns {
            existing.push(check_column(dir, col, old_rows)?);
        }

        let mut touched = Vec::new();
        let written = match self.write_columns(dir, &meta, &existing, &mut touched) {
            Ok(written) => written,
            Err(err) => {
                rollback(dir, &touched);
                return Err(err);
            }
        };

        let previous = meta.clone();
        meta.rows = total;
        meta.columns = written;
        meta.timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        if let Err(err) = lock.write_meta(&meta) {
            rollback(dir, &touched);
            if let Err(restore) = lock.write_meta(&previous) {
                tracing::error!(error = %restore, "failed to restore partition metadata");
            }
            return Err(err);
        }

        tracing::info!(
            partition = %meta.name,
            appended = new_rows,
            total,
            columns = meta.columns.len(),
            "flushed write buffer"
        );
        self.clear();
        Ok(new_rows as u64)
    }

    // Appends to existing columns and creates new ones, recording each file
    // it changes in `touched`.
    fn write_columns(
        &self,
        dir: &Path,
        meta: &PartitionMeta,
        existing: &[ExistingColumn],
        touched: &mut Vec<Touched>,
    ) -> Result<Vec<ColumnMeta>, Error> {
        let old_rows = meta.rows;
        let new_rows = self.rows();
        let total = old_rows + new_rows as u64;

        let mut written: Vec<ColumnMeta> = Vec::new();
        for (col, prior) in meta.columns.iter().zip(existing) {
            let buffered = self
                .columns
                .iter()
                .find(|buffered| buffered.name.eq_ignore_ascii_case(&col.name));
            let (mut values, valid) = match buffered {
                Some(buffered) => (buffered.values.clone(), buffered.valid.clone()),
                None => (ColumnValues::nulls(col.column_type, 0), RoaringBitmap::new()),
            };
            values.pad_to(new_rows);
            touched.push(Touched {
                name: col.name.clone(),
                old_len: Some(prior.len),
                old_mask: prior.mask.clone(),
            });
            append_column(dir, &col.name, old_rows, &values, &valid, prior.mask.as_ref())?;
            written.push(col.clone());
        }
        for col in &self.columns {
            if meta.column(&col.name).is_some() {
                continue;
            }
            let column_type = col.values.column_type();
            let mut values = ColumnValues::nulls(column_type, old_rows as usize);
            values.overlay(old_rows as usize, &col.values)?;
            values.pad_to(old_rows as usize + new_rows);
            let mut valid = RoaringBitmap::new();
            for row in col.valid.iter() {
                valid.insert(old_rows as u32 + row);
            }
            touched.push(Touched {
                name: col.name.clone(),
                old_len: None,
                old_mask: None,
            });
            create_column(dir, &col.name, total, &values, &valid)?;
            written.push(ColumnMeta {
                name: col.name.clone(),
                column_type,
            });
        }

        remove_stale_indexes(dir, &written)?;
        Ok(written)
    }
}

// State of an existing column before a flush.
struct ExistingColumn {
    len: u64,
    mask: Option<RoaringBitmap>,
}

// A column file changed by an unfinished flush.
struct Touched {
    name: String,
    /// `None` for a column the flush created.
    old_len: Option<u64>,
    old_mask: Option<RoaringBitmap>,
}

fn check_column(dir: &Path, col: &ColumnMeta, old_rows: u64) -> Result<ExistingColumn, Error> {
    let path = dir.join(&col.name);
    let expected = old_rows * col.column_type.width() as u64;
    let len = match fs::metadata(&path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && expected == 0 => 0,
        Err(err) => return Err(Error::io(err, &path).with_column(&col.name)),
    };
    if len != expected {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!(
                "column file holds {len} bytes, expected {expected} before append"
            ))
            .with_column(&col.name)
            .with_path(&path));
    }
    let mask_path = dir.join(format!("{}{MASK_SUFFIX}", col.name));
    let mask = if mask_path.is_file() {
        Some(read_mask(&mask_path).map_err(|err| err.with_column(&col.name))?)
    } else {
        None
    };
    Ok(ExistingColumn { len, mask })
}

// Best effort: put every touched file back the way `check_column` found it.
fn rollback(dir: &Path, touched: &[Touched]) {
    for item in touched.iter().rev() {
        let path = dir.join(&item.name);
        let restored = match item.old_len {
            Some(len) => OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.set_len(len))
                .map_err(|err| Error::io(err, &path)),
            None => remove_if_present(&path),
        };
        let mask_path = dir.join(format!("{}{MASK_SUFFIX}", item.name));
        let restored = restored.and_then(|_| match &item.old_mask {
            Some(mask) => write_mask(&mask_path, mask),
            None => remove_if_present(&mask_path),
        });
        match restored {
            Ok(()) => tracing::debug!(column = %item.name, "rolled back column"),
            Err(err) => tracing::error!(column = %item.name, error = %err, "rollback failed"),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(err, path)),
    }
}

fn is_valid_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn append_column(
    dir: &Path,
    name: &str,
    old_rows: u64,
    values: &ColumnValues,
    valid: &RoaringBitmap,
    prior_mask: Option<&RoaringBitmap>,
) -> Result<(), Error> {
    let path = dir.join(name);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| Error::io(err, &path).with_column(name))?;
    file.write_all(&values.encode_le())
        .and_then(|_| file.flush())
        .map_err(|err| Error::io(err, &path).with_column(name))?;

    let mut mask = prior_mask.cloned().unwrap_or_else(|| full_mask(old_rows));
    for row in valid.iter() {
        mask.insert(old_rows as u32 + row);
    }
    let mask_path = dir.join(format!("{name}{MASK_SUFFIX}"));
    store_mask(&mask_path, &mask, old_rows + values.len() as u64)
}

fn create_column(
    dir: &Path,
    name: &str,
    total: u64,
    values: &ColumnValues,
    valid: &RoaringBitmap,
) -> Result<(), Error> {
    let path = dir.join(name);
    fs::write(&path, values.encode_le()).map_err(|err| Error::io(err, &path).with_column(name))?;
    store_mask(&dir.join(format!("{name}{MASK_SUFFIX}")), valid, total)
}

// A mask covering every row is implied by its absence.
fn store_mask(path: &Path, mask: &RoaringBitmap, rows: u64) -> Result<(), Error> {
    if mask.len() == rows {
        if path.is_file() {
            fs::remove_file(path).map_err(|err| Error::io(err, path))?;
        }
        return Ok(());
    }
    write_mask(path, mask)
}

fn remove_stale_indexes(dir: &Path, columns: &[ColumnMeta]) -> Result<(), Error> {
    for col in columns {
        let path = dir.join(format!("{}{INDEX_SUFFIX}", col.name));
        if path.is_file() {
            fs::remove_file(&path).map_err(|err| Error::io(err, &path))?;
            tracing::debug!(column = %col.name, "removed stale index");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::path::Path;

    use super::WriteBuffer;
    use crate::core::column::{ColumnType, ColumnValues};
    use crate::core::error::ErrorKind;
    use crate::core::partition::Partition;

    #[test]
    fn flush_creates_then_appends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        assert_eq!(buffer.flush(&dir).unwrap(), 3);
        assert!(buffer.is_empty());

        buffer
            .add_values("a", ColumnValues::from(vec![4i32, 5]), 0)
            .unwrap();
        assert_eq!(buffer.flush(&dir).unwrap(), 2);

        let partition = Partition::open(&dir).unwrap();
        assert_eq!(partition.rows(), 5);
        assert_eq!(
            partition.load_values("a").unwrap(),
            ColumnValues::from(vec![1i32, 2, 3, 4, 5])
        );
        assert_eq!(partition.load_mask("a").unwrap().len(), 5);
    }

    #[test]
    fn new_and_missing_columns_are_masked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        buffer
            .add_values("b", ColumnValues::from(vec![7.5f64]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        let partition = Partition::open(&dir).unwrap();
        assert_eq!(partition.rows(), 3);
        let a_mask = partition.load_mask("a").unwrap();
        assert_eq!(a_mask.iter().collect::<Vec<_>>(), vec![0, 1]);
        let b_mask = partition.load_mask("b").unwrap();
        assert_eq!(b_mask.iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            partition.column("b").unwrap().column_type,
            ColumnType::Double
        );
    }

    #[test]
    fn type_mismatch_is_rejected_before_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        buffer
            .add_values("a", ColumnValues::from(vec![1i64]), 0)
            .unwrap();
        let err = buffer.flush(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(Partition::open(&dir).unwrap().rows(), 1);
    }

    fn two_column_partition(dir: &Path) -> WriteBuffer {
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        buffer
            .add_values("b", ColumnValues::from(vec![7i32]), 2)
            .unwrap();
        buffer.flush(dir).unwrap();
        buffer
            .add_values("a", ColumnValues::from(vec![4i32]), 0)
            .unwrap();
        buffer
            .add_values("b", ColumnValues::from(vec![8i32]), 0)
            .unwrap();
        buffer
    }

    fn assert_untouched(dir: &Path) {
        let partition = Partition::open(dir).unwrap();
        assert_eq!(partition.rows(), 3);
        assert_eq!(
            partition.load_values("a").unwrap(),
            ColumnValues::from(vec![1i32, 2, 3])
        );
    }

    #[test]
    fn corrupt_mask_rejects_flush_before_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = two_column_partition(&dir);
        fs::write(dir.join("b.msk"), b"not a bitmap").unwrap();

        let err = buffer.flush(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_untouched(&dir);
    }

    #[test]
    fn short_column_rejects_flush_before_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = two_column_partition(&dir);
        let file = OpenOptions::new().write(true).open(dir.join("b")).unwrap();
        file.set_len(4).unwrap();

        let err = buffer.flush(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert_untouched(&dir);
    }

    #[test]
    fn failed_write_rolls_back_appended_columns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        // The new column's mask cannot be written over a directory.
        fs::create_dir(dir.join("c.msk")).unwrap();
        buffer
            .add_values("a", ColumnValues::from(vec![4i32, 5]), 0)
            .unwrap();
        buffer
            .add_values("c", ColumnValues::from(vec![1.5f64]), 1)
            .unwrap();
        assert!(buffer.flush(&dir).is_err());

        assert_untouched(&dir);
        assert!(!dir.join("c").exists());
        assert_eq!(fs::metadata(dir.join("a")).unwrap().len(), 12);
    }

    #[test]
    fn add_values_with_gap_pads_nulls() {
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("x", ColumnValues::from(vec![1u8]), 2)
            .unwrap();
        assert_eq!(buffer.rows(), 3);
        let err = buffer
            .add_values("1bad", ColumnValues::from(vec![1u8]), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
