// Per-column bitmap indexes: equality or equi-depth binned, persisted as `<col>.idx`.
use std::fmt;
use std::fs;
use std::path::Path;

use roaring::RoaringBitmap;

use crate::core::error::{Error, ErrorKind};
use crate::core::expr::CompareOp;
use crate::core::partition::Partition;

const MAGIC: [u8; 4] = *b"BSIX";
const VERSION: u32 = 1;
const ENDIANNESS_LE: u8 = 1;
const HEADER_SIZE: usize = 32;

const DEFAULT_MAX_DISTINCT: usize = 4096;
const DEFAULT_BINS: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexSpec {
    /// Equality for low-cardinality columns, binned otherwise.
    Default,
    None,
    Equality,
    Binning { nbins: usize },
}

impl IndexSpec {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let text = input.trim().trim_matches('"').trim();
        if text.is_empty() || text.eq_ignore_ascii_case("default") {
            return Ok(IndexSpec::Default);
        }
        let lower = text.to_ascii_lowercase();
        if lower == "none" || lower == "noindex" {
            return Ok(IndexSpec::None);
        }
        if lower.starts_with("equality") || lower == "basic" {
            return Ok(IndexSpec::Equality);
        }
        if let Some(rest) = lower.strip_prefix("binning") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(IndexSpec::Binning {
                    nbins: DEFAULT_BINS,
                });
            }
            let value = rest
                .strip_prefix("nbins")
                .map(|tail| tail.trim_start().trim_start_matches('=').trim())
                .and_then(|digits| digits.parse::<usize>().ok())
                .filter(|nbins| *nbins > 0);
            return match value {
                Some(nbins) => Ok(IndexSpec::Binning { nbins }),
                None => Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid binning option \"{text}\""))
                    .with_hint("Use `binning nbins=<n>` with n > 0.")),
            };
        }
        Err(Error::new(ErrorKind::Usage)
            .with_message(format!("unknown index specification \"{text}\""))
            .with_hint("Use none, equality, binning nbins=<n>, or leave empty for the default."))
    }

    /// First non-empty candidate wins; nothing set means the default.
    pub fn resolve<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Result<Self, Error> {
        match candidates
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
        {
            Some(text) => IndexSpec::parse(text),
            None => Ok(IndexSpec::Default),
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSpec::Default => f.write_str("default"),
            IndexSpec::None => f.write_str("none"),
            IndexSpec::Equality => f.write_str("equality"),
            IndexSpec::Binning { nbins } => write!(f, "binning nbins={nbins}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexKind {
    Equality,
    Binned,
}

impl IndexKind {
    fn code(self) -> u8 {
        match self {
            IndexKind::Equality => 1,
            IndexKind::Binned => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(IndexKind::Equality),
            2 => Some(IndexKind::Binned),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Bin {
    lo: f64,
    hi: f64,
    rows: RoaringBitmap,
}

/// Bins of rows keyed by value range. An equality index has `lo == hi` in
/// every bin. Null and NaN rows are never indexed.
#[derive(Clone, Debug, PartialEq)]
pub struct BitmapIndex {
    kind: IndexKind,
    rows: u64,
    bins: Vec<Bin>,
}

impl BitmapIndex {
    /// Builds from widened values and the column's validity mask.
    /// Returns `None` for `IndexSpec::None`.
    pub fn build(values: &[f64], valid: &RoaringBitmap, spec: IndexSpec) -> Option<Self> {
        let mut pairs: Vec<(f64, u32)> = valid
            .iter()
            .filter_map(|row| {
                let value = *values.get(row as usize)?;
                (!value.is_nan()).then_some((value, row))
            })
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let distinct = count_distinct(&pairs);
        let (kind, nbins) = match spec {
            IndexSpec::None => return None,
            IndexSpec::Equality => (IndexKind::Equality, distinct),
            IndexSpec::Binning { nbins } if nbins >= distinct => (IndexKind::Equality, distinct),
            IndexSpec::Binning { nbins } => (IndexKind::Binned, nbins),
            IndexSpec::Default if distinct <= DEFAULT_MAX_DISTINCT => {
                (IndexKind::Equality, distinct)
            }
            IndexSpec::Default => (IndexKind::Binned, DEFAULT_BINS),
        };

        let bins = match kind {
            IndexKind::Equality => group_bins(&pairs, 1),
            IndexKind::Binned => group_bins(&pairs, pairs.len().div_ceil(nbins.max(1))),
        };
        Some(Self {
            kind,
            rows: values.len() as u64,
            bins,
        })
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Rows that certainly satisfy `value op constant`, and rows that must be
    /// checked against raw values.
    pub fn evaluate(&self, op: CompareOp, constant: f64) -> (RoaringBitmap, RoaringBitmap) {
        let mut hits = RoaringBitmap::new();
        let mut candidates = RoaringBitmap::new();
        if constant.is_nan() {
            return (hits, candidates);
        }
        for bin in &self.bins {
            match classify(bin, op, constant) {
                Coverage::All => hits |= &bin.rows,
                Coverage::Some => candidates |= &bin.rows,
                Coverage::None => {}
            }
        }
        (hits, candidates)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8] = ENDIANNESS_LE;
        buf[9] = self.kind.code();
        buf[16..24].copy_from_slice(&self.rows.to_le_bytes());
        buf[24..32].copy_from_slice(&(self.bins.len() as u64).to_le_bytes());

        for bin in &self.bins {
            buf.extend_from_slice(&bin.lo.to_le_bytes());
            buf.extend_from_slice(&bin.hi.to_le_bytes());
            buf.extend_from_slice(&(bin.rows.serialized_size() as u64).to_le_bytes());
            bin.rows.serialize_into(&mut buf).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to serialize index bitmap")
                    .with_source(err)
            })?;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::new(ErrorKind::Corrupt).with_message("index header too small"));
        }
        if buf[0..4] != MAGIC {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bad index magic"));
        }
        let version = u32::from_le_bytes(read_4(buf, 4));
        if version != VERSION {
            return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported index version"));
        }
        if buf[8] != ENDIANNESS_LE {
            return Err(Error::new(ErrorKind::Corrupt).with_message("unsupported endianness"));
        }
        let kind = IndexKind::from_code(buf[9])
            .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("unknown index kind"))?;
        let rows = read_u64(buf, 16);
        let count = read_u64(buf, 24) as usize;

        let mut offset = HEADER_SIZE;
        let mut bins = Vec::with_capacity(count.min(DEFAULT_MAX_DISTINCT));
        for _ in 0..count {
            if buf.len() < offset + 24 {
                return Err(Error::new(ErrorKind::Corrupt).with_message("truncated index bin"));
            }
            let lo = f64::from_le_bytes(read_8(buf, offset));
            let hi = f64::from_le_bytes(read_8(buf, offset + 8));
            let len = read_u64(buf, offset + 16) as usize;
            offset += 24;
            let Some(bytes) = buf.get(offset..offset.saturating_add(len)) else {
                return Err(Error::new(ErrorKind::Corrupt).with_message("truncated index bitmap"));
            };
            let rows = RoaringBitmap::deserialize_from(bytes).map_err(|err| {
                Error::new(ErrorKind::Corrupt)
                    .with_message("invalid index bitmap")
                    .with_source(err)
            })?;
            offset += len;
            bins.push(Bin { lo, hi, rows });
        }
        if offset != buf.len() {
            return Err(Error::new(ErrorKind::Corrupt).with_message("trailing bytes in index"));
        }
        Ok(Self { kind, rows, bins })
    }
}

enum Coverage {
    All,
    Some,
    None,
}

fn classify(bin: &Bin, op: CompareOp, constant: f64) -> Coverage {
    match op {
        CompareOp::Eq => {
            if bin.lo == constant && bin.hi == constant {
                Coverage::All
            } else if bin.lo <= constant && constant <= bin.hi {
                Coverage::Some
            } else {
                Coverage::None
            }
        }
        CompareOp::Ne => {
            if constant < bin.lo || constant > bin.hi {
                Coverage::All
            } else if bin.lo == bin.hi {
                Coverage::None
            } else {
                Coverage::Some
            }
        }
        // Monotone operators: both ends agreeing decides the whole bin.
        _ => match (op.apply(bin.lo, constant), op.apply(bin.hi, constant)) {
            (true, true) => Coverage::All,
            (false, false) => Coverage::None,
            _ => Coverage::Some,
        },
    }
}

fn count_distinct(sorted: &[(f64, u32)]) -> usize {
    let mut count = 0;
    let mut last: Option<f64> = None;
    for (value, _) in sorted {
        if last != Some(*value) {
            count += 1;
            last = Some(*value);
        }
    }
    count
}

// Closes a bin once it holds `depth` rows and the value changes, so equal
// values never straddle two bins.
fn group_bins(sorted: &[(f64, u32)], depth: usize) -> Vec<Bin> {
    let mut bins: Vec<Bin> = Vec::new();
    for &(value, row) in sorted {
        let start_new = match bins.last() {
            None => true,
            Some(bin) => bin.hi != value && bin.rows.len() >= depth as u64,
        };
        if start_new {
            bins.push(Bin {
                lo: value,
                hi: value,
                rows: RoaringBitmap::new(),
            });
        }
        if let Some(bin) = bins.last_mut() {
            bin.hi = value;
            bin.rows.insert(row);
        }
    }
    bins
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_8(buf, offset))
}

/// Loads the current index of a column. Missing, stale, or unreadable index
/// files yield `None`; queries then scan the raw values.
pub fn load_index(partition: &Partition, column: &str) -> Option<BitmapIndex> {
    let path = partition.index_path(column);
    let bytes = fs::read(&path).ok()?;
    match BitmapIndex::decode(&bytes) {
        Ok(index) if index.rows == partition.rows() => Some(index),
        Ok(index) => {
            tracing::debug!(
                column,
                index_rows = index.rows,
                rows = partition.rows(),
                "ignoring stale index"
            );
            None
        }
        Err(err) => {
            tracing::warn!(column, error = %err, "ignoring unreadable index");
            None
        }
    }
}

/// Builds and writes the index of one column. Returns whether a file was written.
pub fn build_index(dir: &Path, column: &str, spec: IndexSpec) -> Result<bool, Error> {
    let partition = Partition::open(dir)?;
    build_column_index(&partition, column, spec)
}

/// Builds indexes for every column and returns how many were written.
pub fn build_indexes(dir: &Path, spec: IndexSpec) -> Result<usize, Error> {
    let partition = Partition::open(dir)?;
    let mut built = 0;
    for col in partition.columns() {
        if build_column_index(&partition, &col.name, spec)? {
            built += 1;
        }
    }
    tracing::info!(partition = %partition.name(), built, %spec, "built indexes");
    Ok(built)
}

fn build_column_index(partition: &Partition, column: &str, spec: IndexSpec) -> Result<bool, Error> {
    let name = partition.require_column(column)?.name.clone();
    let path = partition.index_path(&name);
    let values = partition.load_values(&name)?.to_f64_vec();
    let valid = partition.load_mask(&name)?;
    let Some(index) = BitmapIndex::build(&values, &valid, spec) else {
        remove_index_file(&path)?;
        return Ok(false);
    };
    let bytes = index.encode()?;
    fs::write(&path, bytes).map_err(|err| Error::io(err, &path).with_column(&name))?;
    tracing::debug!(
        column = %name,
        kind = ?index.kind(),
        bins = index.bin_count(),
        "wrote index"
    );
    Ok(true)
}

pub fn purge_index(dir: &Path, column: &str) -> Result<(), Error> {
    let partition = Partition::open(dir)?;
    let name = partition.require_column(column)?.name.clone();
    remove_index_file(&partition.index_path(&name))
}

/// Removes every index file of the partition.
pub fn purge_indexes(dir: &Path) -> Result<(), Error> {
    let partition = Partition::open(dir)?;
    for col in partition.columns() {
        remove_index_file(&partition.index_path(&col.name))?;
    }
    tracing::debug!(partition = %partition.name(), "purged indexes");
    Ok(())
}

fn remove_index_file(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(err, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::{BitmapIndex, IndexKind, IndexSpec, build_indexes, load_index, purge_indexes};
    use crate::core::buffer::WriteBuffer;
    use crate::core::column::ColumnValues;
    use crate::core::error::ErrorKind;
    use crate::core::expr::CompareOp;
    use crate::core::partition::{Partition, full_mask};

    fn rows(bitmap: &roaring::RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    #[test]
    fn spec_parsing() {
        assert_eq!(IndexSpec::parse("").unwrap(), IndexSpec::Default);
        assert_eq!(IndexSpec::parse("NONE").unwrap(), IndexSpec::None);
        assert_eq!(IndexSpec::parse("equality").unwrap(), IndexSpec::Equality);
        assert_eq!(
            IndexSpec::parse("binning nbins=16").unwrap(),
            IndexSpec::Binning { nbins: 16 }
        );
        assert_eq!(
            IndexSpec::parse("binning nbins=0").unwrap_err().kind(),
            ErrorKind::Usage
        );
        assert_eq!(
            IndexSpec::resolve([None, Some("  "), Some("none"), Some("equality")]).unwrap(),
            IndexSpec::None
        );
        assert_eq!(IndexSpec::resolve([None, None]).unwrap(), IndexSpec::Default);
    }

    #[test]
    fn equality_index_is_exact() {
        let values: Vec<f64> = (0..20).map(|v| (v % 5) as f64).collect();
        let index = BitmapIndex::build(&values, &full_mask(20), IndexSpec::Default).unwrap();
        assert_eq!(index.kind(), IndexKind::Equality);
        assert_eq!(index.bin_count(), 5);

        let (hits, candidates) = index.evaluate(CompareOp::Lt, 2.0);
        assert!(candidates.is_empty());
        assert_eq!(hits.len(), 8);
        let (hits, _) = index.evaluate(CompareOp::Ne, 4.0);
        assert_eq!(hits.len(), 16);
    }

    #[test]
    fn binned_index_reports_candidates() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let index =
            BitmapIndex::build(&values, &full_mask(100), IndexSpec::Binning { nbins: 10 }).unwrap();
        assert_eq!(index.kind(), IndexKind::Binned);
        assert_eq!(index.bin_count(), 10);

        let (hits, candidates) = index.evaluate(CompareOp::Lt, 25.0);
        assert_eq!(rows(&hits), (0..20).collect::<Vec<_>>());
        assert_eq!(rows(&candidates), (20..30).collect::<Vec<_>>());

        let (hits, candidates) = index.evaluate(CompareOp::Eq, 150.0);
        assert!(hits.is_empty() && candidates.is_empty());
    }

    #[test]
    fn null_rows_are_not_indexed() {
        let values = vec![1.0, 2.0, f64::NAN, 1.0];
        let mut valid = full_mask(4);
        valid.remove(3);
        let index = BitmapIndex::build(&values, &valid, IndexSpec::Equality).unwrap();
        let (hits, _) = index.evaluate(CompareOp::Ge, 0.0);
        assert_eq!(rows(&hits), vec![0, 1]);
    }

    #[test]
    fn encode_decode_preserves_bins() {
        let values: Vec<f64> = (0..50).map(|v| f64::from(v * 3)).collect();
        let index =
            BitmapIndex::build(&values, &full_mask(50), IndexSpec::Binning { nbins: 7 }).unwrap();
        let bytes = index.encode().unwrap();
        assert_eq!(&bytes[0..4], b"BSIX");
        assert_eq!(BitmapIndex::decode(&bytes).unwrap(), index);

        let err = BitmapIndex::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn partition_indexes_go_stale_after_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("a", ColumnValues::from(vec![1i32, 2, 3]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        assert_eq!(build_indexes(&dir, IndexSpec::Default).unwrap(), 1);
        let partition = Partition::open(&dir).unwrap();
        assert!(load_index(&partition, "a").is_some());
        assert!(partition.index_path("a").is_file());

        buffer
            .add_values("a", ColumnValues::from(vec![4i32]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();
        let partition = Partition::open(&dir).unwrap();
        assert!(load_index(&partition, "a").is_none());

        build_indexes(&dir, IndexSpec::Equality).unwrap();
        purge_indexes(&dir).unwrap();
        assert!(!partition.index_path("a").is_file());
    }
}
