// Evaluates a parsed condition against one partition, producing the hit bitmap.
use std::collections::{BTreeSet, HashMap};

use roaring::RoaringBitmap;

use crate::core::error::Error;
use crate::core::expr::{CompareOp, Condition, Term};
use crate::core::index::{BitmapIndex, load_index};
use crate::core::partition::{Partition, full_mask};

struct ColumnData {
    values: Vec<f64>,
    valid: RoaringBitmap,
    index: Option<Option<BitmapIndex>>,
}

/// Column values are loaded once per evaluator and widened to f64.
pub struct Evaluator<'a> {
    partition: &'a Partition,
    columns: HashMap<String, ColumnData>,
}

impl<'a> Evaluator<'a> {
    pub fn new(partition: &'a Partition) -> Self {
        Self {
            partition,
            columns: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, cond: &Condition) -> Result<RoaringBitmap, Error> {
        match cond {
            Condition::Const(true) => Ok(full_mask(self.partition.rows())),
            Condition::Const(false) => Ok(RoaringBitmap::new()),
            Condition::And(l, r) => Ok(self.evaluate(l)? & self.evaluate(r)?),
            Condition::Or(l, r) => Ok(self.evaluate(l)? | self.evaluate(r)?),
            Condition::Xor(l, r) => Ok(self.evaluate(l)? ^ self.evaluate(r)?),
            Condition::Not(inner) => {
                let selected = self.evaluate(inner)?;
                let valid = self.valid_rows(&inner.columns())?;
                Ok(valid - selected)
            }
            Condition::Compare { left, op, right } => {
                if let Some((column, op, constant)) = column_vs_constant(left, *op, right) {
                    return self.compare_column(column, op, constant);
                }
                self.scan(cond)
            }
            Condition::Range {
                low,
                low_op,
                mid,
                high_op,
                high,
            } => match (mid.as_column(), low.as_number(), high.as_number()) {
                (Some(column), Some(lo), Some(hi)) => {
                    let lower = self.compare_column(column, low_op.flip(), lo)?;
                    let upper = self.compare_column(column, *high_op, hi)?;
                    Ok(lower & upper)
                }
                _ => self.scan(cond),
            },
            Condition::In { term, values } => match term.as_column() {
                Some(column) => {
                    let mut out = RoaringBitmap::new();
                    for value in values {
                        out |= self.compare_column(column, CompareOp::Eq, *value)?;
                    }
                    Ok(out)
                }
                None => self.scan(cond),
            },
        }
    }

    fn load(&mut self, name: &str) -> Result<(), Error> {
        let key = name.to_ascii_lowercase();
        if self.columns.contains_key(&key) {
            return Ok(());
        }
        let meta = self.partition.require_column(name)?;
        let values = self.partition.load_values(&meta.name)?.to_f64_vec();
        let valid = self.partition.load_mask(&meta.name)?;
        self.columns.insert(
            key,
            ColumnData {
                values,
                valid,
                index: None,
            },
        );
        Ok(())
    }

    fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.get(&name.to_ascii_lowercase())
    }

    // Rows where every listed column holds a value.
    fn valid_rows(&mut self, names: &BTreeSet<String>) -> Result<RoaringBitmap, Error> {
        let mut valid = full_mask(self.partition.rows());
        for name in names {
            self.load(name)?;
            if let Some(data) = self.column(name) {
                valid &= &data.valid;
            }
        }
        Ok(valid)
    }

    fn compare_column(
        &mut self,
        name: &str,
        op: CompareOp,
        constant: f64,
    ) -> Result<RoaringBitmap, Error> {
        self.load(name)?;
        let key = name.to_ascii_lowercase();
        let partition = self.partition;
        let Some(data) = self.columns.get_mut(&key) else {
            return Ok(RoaringBitmap::new());
        };
        if data.index.is_none() {
            let real = partition
                .column(name)
                .map(|meta| meta.name.clone())
                .unwrap_or_else(|| name.to_string());
            data.index = Some(load_index(partition, &real));
        }

        match data.index.as_ref().and_then(Option::as_ref) {
            Some(index) => {
                let (mut hits, candidates) = index.evaluate(op, constant);
                for row in candidates.iter() {
                    if data.valid.contains(row) && op.apply(data.values[row as usize], constant) {
                        hits.insert(row);
                    }
                }
                tracing::trace!(column = name, ?op, constant, hits = hits.len(), "index lookup");
                Ok(hits)
            }
            None => Ok(data
                .valid
                .iter()
                .filter(|row| op.apply(data.values[*row as usize], constant))
                .collect()),
        }
    }

    fn scan(&mut self, cond: &Condition) -> Result<RoaringBitmap, Error> {
        let names = cond.columns();
        let valid = self.valid_rows(&names)?;
        let columns = &self.columns;
        let mut hits = RoaringBitmap::new();
        for row in valid.iter() {
            let lookup = |name: &str| {
                columns
                    .get(&name.to_ascii_lowercase())
                    .and_then(|data| data.values.get(row as usize).copied())
                    .unwrap_or(f64::NAN)
            };
            if predicate_holds(cond, &lookup) {
                hits.insert(row);
            }
        }
        tracing::trace!(condition = %cond, hits = hits.len(), "scanned predicate");
        Ok(hits)
    }
}

/// Evaluates `cond` on `partition`.
pub fn evaluate(partition: &Partition, cond: &Condition) -> Result<RoaringBitmap, Error> {
    Evaluator::new(partition).evaluate(cond)
}

fn column_vs_constant<'t>(
    left: &'t Term,
    op: CompareOp,
    right: &'t Term,
) -> Option<(&'t str, CompareOp, f64)> {
    match (left, right) {
        (Term::Column(name), Term::Number(value)) => Some((name, op, *value)),
        (Term::Number(value), Term::Column(name)) => Some((name, op.flip(), *value)),
        _ => None,
    }
}

fn predicate_holds(cond: &Condition, lookup: &impl Fn(&str) -> f64) -> bool {
    match cond {
        Condition::Const(value) => *value,
        Condition::Compare { left, op, right } => op.apply(left.eval(lookup), right.eval(lookup)),
        Condition::Range {
            low,
            low_op,
            mid,
            high_op,
            high,
        } => {
            let value = mid.eval(lookup);
            low_op.apply(low.eval(lookup), value) && high_op.apply(value, high.eval(lookup))
        }
        Condition::In { term, values } => {
            let value = term.eval(lookup);
            values.iter().any(|candidate| *candidate == value)
        }
        Condition::Not(inner) => !predicate_holds(inner, lookup),
        Condition::And(l, r) => predicate_holds(l, lookup) && predicate_holds(r, lookup),
        Condition::Or(l, r) => predicate_holds(l, lookup) || predicate_holds(r, lookup),
        Condition::Xor(l, r) => predicate_holds(l, lookup) != predicate_holds(r, lookup),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::evaluate;
    use crate::core::buffer::WriteBuffer;
    use crate::core::column::ColumnValues;
    use crate::core::error::ErrorKind;
    use crate::core::expr::parse_condition;
    use crate::core::index::{IndexSpec, build_indexes};
    use crate::core::partition::Partition;

    // a = 0..99, b = a as f32, c = 99 - a
    fn fixture(dir: &Path) {
        let a: Vec<i32> = (0..100).collect();
        let b: Vec<f32> = (0..100).map(|v| v as f32).collect();
        let c: Vec<i16> = (0..100).map(|v| 99 - v as i16).collect();
        let mut buffer = WriteBuffer::new();
        buffer.add_values("a", ColumnValues::from(a), 0).unwrap();
        buffer.add_values("b", ColumnValues::from(b), 0).unwrap();
        buffer.add_values("c", ColumnValues::from(c), 0).unwrap();
        buffer.flush(dir).unwrap();
    }

    fn count(dir: &Path, text: &str) -> u64 {
        let partition = Partition::open(dir).unwrap();
        let cond = parse_condition(text).unwrap();
        evaluate(&partition, &cond).unwrap().len()
    }

    #[test]
    fn counts_match_with_and_without_indexes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        fixture(&dir);

        let cases = [
            ("a < 5", 5),
            ("a + b > 150", 24),
            ("a < 60 and c < 60", 20),
            ("c > 90", 9),
            ("c > a", 50),
            ("10 <= a < 20", 10),
            ("a between 10 and 19", 10),
            ("a in (1, 3, 500)", 2),
            ("not a < 5", 95),
            ("! a < 5", 95),
            ("!(a < 5) and a < 10", 5),
            ("a < 10 xor a < 5", 5),
            ("a < 5 or c < 5", 10),
            ("", 100),
        ];
        for (text, expected) in cases {
            assert_eq!(count(&dir, text), expected, "scan: {text}");
        }

        build_indexes(&dir, IndexSpec::Binning { nbins: 7 }).unwrap();
        for (text, expected) in cases {
            assert_eq!(count(&dir, text), expected, "binned: {text}");
        }

        build_indexes(&dir, IndexSpec::Equality).unwrap();
        for (text, expected) in cases {
            assert_eq!(count(&dir, text), expected, "equality: {text}");
        }
    }

    #[test]
    fn null_rows_never_qualify() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        let mut buffer = WriteBuffer::new();
        buffer
            .add_values("x", ColumnValues::from(vec![1i32, 2, 3, 4]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();
        buffer
            .add_values("y", ColumnValues::from(vec![10i32, 20]), 0)
            .unwrap();
        buffer.flush(&dir).unwrap();

        assert_eq!(count(&dir, "y > 0"), 2);
        assert_eq!(count(&dir, "x > 0"), 4);
        assert_eq!(count(&dir, "not y > 15"), 1);
        assert_eq!(count(&dir, "x + y > 0"), 0);
        assert_eq!(count(&dir, "y != 10"), 1);
    }

    #[test]
    fn unknown_column_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("p");
        fixture(&dir);
        let partition = Partition::open(&dir).unwrap();
        let cond = parse_condition("zz < 3").unwrap();
        let err = evaluate(&partition, &cond).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
