//! Purpose: Built-in end-to-end check: append a known fixture, then query it.
//! Exports: `run_builtin`, `SelfTestReport`, `SelfTestCheck`, `FIXTURE_ROWS`.
//! Role: Exercised by the CLI when no arguments are given.
//! Invariants: Every run appends one more copy of the fixture, so expected counts scale with it.
use std::path::{Path, PathBuf};

use crate::api::{ApiResult, Error, ErrorKind, Session};

pub const FIXTURE_ROWS: u64 = 100;

/// Conditions and their hit counts for one copy of the fixture.
const CHECKS: [(&str, u64); 5] = [
    ("a<5", 5),
    ("a+b>150", 24),
    ("a < 60 and c < 60", 19),
    ("c > 90", 10),
    ("c > a", 50),
];

#[derive(Clone, Debug, PartialEq)]
pub struct SelfTestCheck {
    pub condition: String,
    pub expected: u64,
    /// `None` when the query itself failed.
    pub hits: Option<u64>,
}

impl SelfTestCheck {
    pub fn passed(&self) -> bool {
        self.hits == Some(self.expected)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelfTestReport {
    pub dir: PathBuf,
    pub rows: u64,
    pub checks: Vec<SelfTestCheck>,
}

impl SelfTestReport {
    pub fn nerrors(&self) -> usize {
        self.checks.iter().filter(|check| !check.passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SelfTestCheck> {
        self.checks.iter().filter(|check| !check.passed())
    }
}

/// Appends the fixture to `dir` and checks query counts against it.
/// Fails with `Corrupt` when the partition holds a partial fixture.
pub fn run_builtin(session: &mut Session, dir: &Path) -> ApiResult<SelfTestReport> {
    let a: Vec<i32> = (0..FIXTURE_ROWS as i32).collect();
    let b: Vec<i16> = (0..FIXTURE_ROWS as i16).collect();
    let c: Vec<f32> = (0..FIXTURE_ROWS).map(|i| (FIXTURE_ROWS - i) as f32).collect();
    session.add_values("a", a, 0)?;
    session.add_values("b", b, 0)?;
    session.add_values("c", c, 0)?;
    session.flush_buffer(dir)?;

    let rows = session.rows_in_partition(dir)?;
    if rows % FIXTURE_ROWS != 0 {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!(
                "Directory {} contains {rows} rows, but expected {FIXTURE_ROWS}, remove the directory and try again",
                dir.display()
            ))
            .with_path(dir));
    }
    let mult = rows / FIXTURE_ROWS;

    let checks = CHECKS
        .iter()
        .map(|(condition, per_copy)| {
            let hits = match session.build_query(None, dir, Some(condition)) {
                Ok(query) => Some(query.result_rows()),
                Err(err) => {
                    tracing::error!(condition, error = %err, "built-in query failed");
                    None
                }
            };
            SelfTestCheck {
                condition: condition.to_string(),
                expected: per_copy * mult,
                hits,
            }
        })
        .collect();

    let report = SelfTestReport {
        dir: dir.to_path_buf(),
        rows,
        checks,
    };
    tracing::info!(rows, nerrors = report.nerrors(), "built-in tests finished");
    Ok(report)
}
