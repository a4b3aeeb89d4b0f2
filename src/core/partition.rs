// Data partition directory: `-part.txt` metadata, raw column files, and validity masks.
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::Mmap;
use roaring::RoaringBitmap;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::column::{ColumnType, ColumnValues};
use crate::core::error::{Error, ErrorKind};

pub const METADATA_FILE: &str = "-part.txt";
pub const MASK_SUFFIX: &str = ".msk";
pub const INDEX_SUFFIX: &str = ".idx";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionMeta {
    pub name: String,
    pub description: String,
    pub rows: u64,
    pub timestamp: i64,
    pub index: Option<String>,
    pub columns: Vec<ColumnMeta>,
}

impl PartitionMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rows: 0,
            timestamp: 0,
            index: None,
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn encode(&self) -> String {
        let stamp = OffsetDateTime::from_unix_timestamp(self.timestamp)
            .ok()
            .and_then(|ts| ts.format(&Rfc3339).ok())
            .unwrap_or_else(|| self.timestamp.to_string());
        let mut out = format!(
            "# meta data for data partition {} written by bitsel on {stamp}\n\n",
            self.name
        );
        out.push_str("BEGIN HEADER\n");
        out.push_str(&format!("Name = {}\n", self.name));
        out.push_str(&format!("Description = {}\n", self.description));
        out.push_str(&format!("Number_of_rows = {}\n", self.rows));
        out.push_str(&format!("Number_of_columns = {}\n", self.columns.len()));
        out.push_str(&format!("Timestamp = {}\n", self.timestamp));
        if let Some(index) = &self.index {
            out.push_str(&format!("index = {index}\n"));
        }
        out.push_str("END HEADER\n");
        for col in &self.columns {
            out.push_str(&format!(
                "\nBegin Column\nname = {}\ndata_type = {}\nEnd Column\n",
                col.name,
                col.column_type.name()
            ));
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, Error> {
        let mut meta = PartitionMeta::new("");
        let mut declared_columns: Option<usize> = None;
        let mut in_header = false;
        let mut column: Option<(Option<String>, Option<ColumnType>)> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case("begin header") {
                in_header = true;
                continue;
            }
            if line.eq_ignore_ascii_case("end header") {
                in_header = false;
                continue;
            }
            if line.eq_ignore_ascii_case("begin column") {
                column = Some((None, None));
                continue;
            }
            if line.eq_ignore_ascii_case("end column") {
                let Some((name, ty)) = column.take() else {
                    return Err(corrupt_meta(lineno, "End Column without Begin Column"));
                };
                let (Some(name), Some(column_type)) = (name, ty) else {
                    return Err(corrupt_meta(lineno, "column is missing name or data_type"));
                };
                meta.columns.push(ColumnMeta { name, column_type });
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = unquote(value.trim());

            if let Some((name, ty)) = column.as_mut() {
                match key.as_str() {
                    "name" => *name = Some(value.to_string()),
                    "data_type" | "type" => {
                        let parsed = ColumnType::ALL
                            .into_iter()
                            .find(|candidate| candidate.name().eq_ignore_ascii_case(value))
                            .ok_or_else(|| {
                                corrupt_meta(lineno, &format!("unknown data_type {value}"))
                            })?;
                        *ty = Some(parsed);
                    }
                    _ => {}
                }
            } else if in_header {
                match key.as_str() {
                    "name" => meta.name = value.to_string(),
                    "description" => meta.description = value.to_string(),
                    "number_of_rows" | "number_of_events" => {
                        meta.rows = value
                            .parse()
                            .map_err(|_| corrupt_meta(lineno, "Number_of_rows is not a number"))?;
                    }
                    "number_of_columns" => {
                        declared_columns = Some(value.parse().map_err(|_| {
                            corrupt_meta(lineno, "Number_of_columns is not a number")
                        })?);
                    }
                    "timestamp" => meta.timestamp = value.parse().unwrap_or(0),
                    "index" => meta.index = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        if column.is_some() {
            return Err(Error::new(ErrorKind::Corrupt).with_message("unterminated column block"));
        }
        if let Some(declared) = declared_columns {
            if declared != meta.columns.len() {
                return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                    "metadata declares {declared} columns but describes {}",
                    meta.columns.len()
                )));
            }
        }
        Ok(meta)
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

fn corrupt_meta(lineno: usize, message: &str) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(format!(
        "{METADATA_FILE} line {}: {message}",
        lineno + 1
    ))
}

/// Partition name derived from the directory, or from a checksum when the
/// directory has no usable last component.
pub fn partition_name(dir: &Path) -> String {
    if let Some(name) = dir.file_name().and_then(|name| name.to_str()) {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    let digest = Sha256::digest(dir.to_string_lossy().as_bytes());
    let mut name: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        let first = (b'A' + digest[0] % 26) as char;
        name.replace_range(0..1, &first.to_string());
    }
    name
}

#[derive(Debug)]
pub struct Partition {
    dir: PathBuf,
    meta: PartitionMeta,
}

impl Partition {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        let mut lock = ReadLock::acquire(&dir)?;
        let mut text = String::new();
        lock.file
            .read_to_string(&mut text)
            .map_err(|err| Error::io(err, &lock.path))?;
        let meta = PartitionMeta::decode(&text).map_err(|err| err.with_path(&lock.path))?;
        tracing::debug!(
            partition = %meta.name,
            rows = meta.rows,
            columns = meta.columns.len(),
            "opened partition"
        );
        Ok(Self { dir, meta })
    }

    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(METADATA_FILE).is_file()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn rows(&self) -> u64 {
        self.meta.rows
    }

    pub fn meta(&self) -> &PartitionMeta {
        &self.meta
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.meta.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.meta.column(name)
    }

    pub fn require_column(&self, name: &str) -> Result<&ColumnMeta, Error> {
        self.column(name).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("no column named \"{name}\""))
                .with_column(name)
                .with_path(&self.dir)
        })
    }

    pub fn data_path(&self, column: &str) -> PathBuf {
        self.dir.join(column)
    }

    pub fn mask_path(&self, column: &str) -> PathBuf {
        self.dir.join(format!("{column}{MASK_SUFFIX}"))
    }

    pub fn index_path(&self, column: &str) -> PathBuf {
        self.dir.join(format!("{column}{INDEX_SUFFIX}"))
    }

    /// Values of the first `rows()` rows. Rows appended after `open` are not
    /// visible.
    pub fn load_values(&self, name: &str) -> Result<ColumnValues, Error> {
        let col = self.require_column(name)?;
        let path = self.data_path(&col.name);
        let expected = self.meta.rows as usize * col.column_type.width();
        let _lock = ReadLock::acquire(&self.dir)?;
        let file = File::open(&path).map_err(|err| {
            Error::io(err, &path)
                .with_message("failed to open column data")
                .with_column(&col.name)
        })?;
        let actual = file
            .metadata()
            .map_err(|err| Error::io(err, &path))?
            .len() as usize;
        if actual < expected {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!(
                    "column file holds {actual} bytes, expected {expected} for {} rows",
                    self.meta.rows
                ))
                .with_column(&col.name)
                .with_path(&path));
        }
        if expected == 0 {
            return Ok(ColumnValues::nulls(col.column_type, 0));
        }
        let mmap = unsafe { Mmap::map(&file).map_err(|err| Error::io(err, &path))? };
        ColumnValues::decode_le(col.column_type, &mmap[..expected])
            .map_err(|err| err.with_column(&col.name).with_path(&path))
    }

    /// Valid rows of a column; every row when no mask file is present.
    pub fn load_mask(&self, name: &str) -> Result<RoaringBitmap, Error> {
        let col = self.require_column(name)?;
        let path = self.mask_path(&col.name);
        let _lock = ReadLock::acquire(&self.dir)?;
        if !path.is_file() {
            return Ok(full_mask(self.meta.rows));
        }
        let mut mask = read_mask(&path)?;
        mask.remove_range(self.meta.rows as u32..);
        Ok(mask)
    }
}

// Shared lock on the metadata file; excludes a concurrent `MetaLock` holder.
struct ReadLock {
    path: PathBuf,
    file: File,
}

impl ReadLock {
    fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(METADATA_FILE);
        let file = File::open(&path).map_err(|err| {
            Error::io(err, &path).with_message("failed to read partition metadata")
        })?;
        file.lock_shared()
            .map_err(|err| Error::io(err, &path).with_message("failed to lock partition"))?;
        Ok(Self { path, file })
    }
}

impl Drop for ReadLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub fn full_mask(rows: u64) -> RoaringBitmap {
    let mut mask = RoaringBitmap::new();
    if rows > 0 {
        mask.insert_range(0..rows as u32);
    }
    mask
}

pub(crate) fn read_mask(path: &Path) -> Result<RoaringBitmap, Error> {
    let file = File::open(path).map_err(|err| Error::io(err, path))?;
    RoaringBitmap::deserialize_from(std::io::BufReader::new(file)).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("invalid mask file")
            .with_path(path)
            .with_source(err)
    })
}

pub(crate) fn write_mask(path: &Path, mask: &RoaringBitmap) -> Result<(), Error> {
    let mut bytes = Vec::with_capacity(mask.serialized_size());
    mask.serialize_into(&mut bytes)
        .map_err(|err| Error::io(err, path))?;
    fs::write(path, bytes).map_err(|err| Error::io(err, path))
}

pub fn rows_in_partition(dir: impl AsRef<Path>) -> Result<u64, Error> {
    Ok(Partition::open(dir)?.rows())
}

pub fn columns_in_partition(dir: impl AsRef<Path>) -> Result<usize, Error> {
    Ok(Partition::open(dir)?.columns().len())
}

/// Exclusive lock on a partition's metadata file, held while it is rewritten.
pub struct MetaLock {
    path: PathBuf,
    file: File,
}

impl MetaLock {
    pub fn acquire(dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(dir).map_err(|err| {
            Error::io(err, dir).with_message("failed to create partition directory")
        })?;
        let path = dir.join(METADATA_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| Error::io(err, &path))?;
        file.lock_exclusive()
            .map_err(|err| Error::io(err, &path).with_message("failed to lock partition"))?;
        Ok(Self { path, file })
    }

    /// Current metadata, or `None` for a partition being created.
    pub fn read_meta(&mut self) -> Result<Option<PartitionMeta>, Error> {
        let mut text = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut text))
            .map_err(|err| Error::io(err, &self.path))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        PartitionMeta::decode(&text)
            .map(Some)
            .map_err(|err| err.with_path(&self.path))
    }

    pub fn write_meta(&mut self, meta: &PartitionMeta) -> Result<(), Error> {
        let text = meta.encode();
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(text.as_bytes()))
            .and_then(|_| self.file.flush())
            .map_err(|err| Error::io(err, &self.path))
    }
}

impl Drop for MetaLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;

    use super::{ColumnMeta, Partition, PartitionMeta, partition_name, read_mask, write_mask};
    use crate::core::buffer::WriteBuffer;
    use crate::core::column::{ColumnType, ColumnValues};
    use crate::core::error::ErrorKind;

    fn sample_meta() -> PartitionMeta {
        let mut meta = PartitionMeta::new("tmp");
        meta.description = "sample".to_string();
        meta.rows = 100;
        meta.timestamp = 1_700_000_000;
        meta.columns = vec![
            ColumnMeta {
                name: "a".to_string(),
                column_type: ColumnType::Int,
            },
            ColumnMeta {
                name: "c".to_string(),
                column_type: ColumnType::Float,
            },
        ];
        meta
    }

    #[test]
    fn metadata_text_decodes_to_same_meta() {
        let meta = sample_meta();
        let text = meta.encode();
        assert!(text.contains("Number_of_rows = 100"));
        assert!(text.contains("data_type = FLOAT"));
        assert_eq!(PartitionMeta::decode(&text).unwrap(), meta);
    }

    #[test]
    fn decode_accepts_quoted_values_and_mixed_case() {
        let text = "begin header\nname = \"p\"\nnumber_of_rows = 3\nEnd Header\n\
                    BEGIN COLUMN\nName = \"x\"\nData_Type = \"double\"\nEND COLUMN\n";
        let meta = PartitionMeta::decode(text).unwrap();
        assert_eq!(meta.name, "p");
        assert_eq!(meta.rows, 3);
        assert_eq!(meta.columns[0].column_type, ColumnType::Double);
        assert!(meta.column("X").is_some());
    }

    #[test]
    fn decode_rejects_column_count_mismatch() {
        let text = "BEGIN HEADER\nNumber_of_columns = 2\nEND HEADER\n\
                    Begin Column\nname = a\ndata_type = INT\nEnd Column\n";
        let err = PartitionMeta::decode(text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn rows_beyond_metadata_are_not_visible() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        buffer
            .add_values("b", ColumnValues::from(vec![9i32]), 1)
            .unwrap();
        buffer.flush(&dir).unwrap();

        // Bytes and mask bits of rows a writer has not yet published.
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.join("a"))
            .unwrap();
        file.write_all(&7i32.to_le_bytes()).unwrap();
        let mut mask = read_mask(&dir.join("b.msk")).unwrap();
        mask.insert(3);
        write_mask(&dir.join("b.msk"), &mask).unwrap();

        let partition = Partition::open(&dir).unwrap();
        assert_eq!(partition.rows(), 3);
        assert_eq!(
            partition.load_values("a").unwrap(),
            ColumnValues::from(vec![1i32, 2, 3])
        );
        assert_eq!(
            partition.load_mask("b").unwrap().iter().collect::<Vec<_>>(),
            vec![1]
        );
    }

    #[test]
    fn short_column_file_is_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();
        let file = OpenOptions::new().write(true).open(dir.join("a")).unwrap();
        file.set_len(5).unwrap();

        let partition = Partition::open(&dir).unwrap();
        let err = partition.load_values("a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn partition_name_uses_last_component() {
        assert_eq!(partition_name(Path::new("/data/run7")), "run7");
        let fallback = partition_name(Path::new("/"));
        assert_eq!(fallback.len(), 8);
        assert!(fallback.starts_with(|c: char| c.is_ascii_alphabetic()));
    }
}
