//! Purpose: `bitsel` CLI entry point: build indexes, run one query, or run the built-in test.
//! Role: Binary crate root; normalizes the single-dash flag grammar, then dispatches.
//! Invariants: Query and retrieval failures are printed diagnostics; the exit code stays 0.
//! Invariants: Only argument-parser failures exit non-zero, via `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, error::ErrorKind as ClapErrorKind};

use bitsel::api::{Error, ErrorKind, QueryHandle, Qualified, Session, to_exit_code};
use bitsel::selftest::{self, SelfTestReport};

const SELFTEST_DIR: &str = "tmp";

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            eprintln!("bitsel: {err}");
            if let Some(hint) = err.hint() {
                eprintln!("  {hint}");
            }
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let normalized = normalize_args(std::env::args_os());
    for token in &normalized.unknown {
        eprintln!("** unknown option {token}");
    }
    let cli = match Cli::try_parse_from(normalized.args) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(RunOutcome::ok());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint(usage_line()));
            }
        },
    };

    if cli.usage {
        print_usage();
    }

    let mut session = match Session::init(cli.conf.as_deref()) {
        Ok(session) => session,
        Err(err) => {
            println!("failed to initialize: {err}");
            return Ok(RunOutcome::ok());
        }
    };
    let level = session.verbose_level() + cli.verbose.iter().sum::<i32>();
    session.set_verbose_level(level);
    if let Some(path) = &cli.log_file {
        if let Err(err) = session.set_log_file(Some(path)) {
            println!("** {err}");
        }
    }
    tracing::debug!(level, conf = ?cli.conf, "starting");

    let outcome = match (&cli.datadir, &cli.conditions) {
        (None, _) => run_selftest(&mut session, Path::new(SELFTEST_DIR)),
        (Some(dir), None) => build_indexes(&session, dir, level),
        (Some(dir), Some(conditions)) => run_query(&session, dir, conditions, &cli.columns),
    };
    session.cleanup();
    Ok(outcome)
}

struct NormalizedArgs {
    args: Vec<OsString>,
    unknown: Vec<String>,
}

/// Rewrites the leading single-dash flags (matched on their second character,
/// case-insensitively) into long options, and ends option parsing at the
/// first token that is not a flag.
fn normalize_args<I>(args: I) -> NormalizedArgs
where
    I: IntoIterator<Item = OsString>,
{
    let mut input = args.into_iter();
    let mut out: Vec<OsString> = input.next().into_iter().collect();
    let rest: Vec<OsString> = input.collect();
    let mut unknown = Vec::new();

    let mut idx = 0;
    while idx < rest.len() {
        let token = rest[idx].to_string_lossy().into_owned();
        if !token.starts_with('-') {
            break;
        }
        let flag = token.chars().nth(1).map(|c| c.to_ascii_lowercase());
        match flag {
            Some('c') | Some('l') => {
                if let Some(value) = rest.get(idx + 1) {
                    out.push(OsString::from(if flag == Some('c') {
                        "--conf"
                    } else {
                        "--log-file"
                    }));
                    out.push(value.clone());
                    idx += 2;
                } else {
                    idx += 1;
                }
            }
            Some('h') => {
                out.push(OsString::from("--usage"));
                idx += 1;
            }
            Some('m') | Some('v') => {
                match rest.get(idx + 1).and_then(|next| verbosity_value(next)) {
                    Some(value) => {
                        out.push(OsString::from(format!("--verbose={value}")));
                        idx += 2;
                    }
                    None => {
                        out.push(OsString::from("--verbose=1"));
                        idx += 1;
                    }
                }
            }
            _ => {
                unknown.push(token);
                idx += 1;
            }
        }
    }

    out.push(OsString::from("--"));
    out.extend(rest.into_iter().skip(idx));
    NormalizedArgs { args: out, unknown }
}

fn verbosity_value(token: &OsString) -> Option<i32> {
    let text = token.to_str()?;
    let digits = text.strip_prefix('-').unwrap_or(text);
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[derive(Parser, Debug)]
#[command(
    name = "bitsel",
    version,
    about = "Test harness for the bitsel bitmap-index query engine",
    args_override_self = true,
    after_help = r#"FLAGS
  -c <conffile>      resource file (overrides $BITSELRC and ./bitsel.rc)
  -l <logfile>       write diagnostics to a file instead of stderr
  -h                 print usage and continue
  -v|-m [level]      raise message verbosity by level (default 1)

EXAMPLES
  $ bitsel                                   # built-in test in ./tmp
  $ bitsel data                              # index all columns in data/
  $ bitsel data 'c1 = 15 and c2 > 23' c1 i c3 d"#
)]
struct Cli {
    #[arg(long = "conf", value_name = "CONFFILE")]
    conf: Option<PathBuf>,

    #[arg(long = "log-file", value_name = "LOGFILE")]
    log_file: Option<PathBuf>,

    #[arg(
        long = "verbose",
        value_name = "LEVEL",
        allow_negative_numbers = true,
        action = ArgAction::Append
    )]
    verbose: Vec<i32>,

    #[arg(long = "usage")]
    usage: bool,

    /// Data partition directory.
    datadir: Option<PathBuf>,

    /// Selection condition, e.g. `a < 5 and b > 2`.
    conditions: Option<String>,

    /// `<column type>` pairs; type is i, l, f (or r), or d.
    columns: Vec<String>,
}

fn usage_line() -> &'static str {
    "usage: bitsel [-c conffile] [-l logfile] [-v [message-level]] datadir [conditions] [<column-name type> ...]"
}

fn print_usage() {
    println!(
        "A simple tester for the bitsel query engine\n\n{}\n\
         In SQL this is equivalent to\n\tFROM datadir [WHERE conditions [SELECT column-name ...]]\n\n\
         If only datadir is present, bitsel indexes all columns in the named directory.\n\
         If conditions are provided without columns to print, bitsel prints the number of hits.\n\
         If any variable is to be printed, it must be specified as a <name type> pair.\n\n\
         Example:\n\
         bitsel dir 'c1 = 15 and c2 > 23' c1 i c3 d\n",
        usage_line()
    );
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn run_selftest(session: &mut Session, dir: &Path) -> RunOutcome {
    match selftest::run_builtin(session, dir) {
        Ok(report) => {
            print_selftest(&report);
            RunOutcome::ok()
        }
        Err(err) if err.kind() == ErrorKind::Corrupt => {
            println!("{}", err.message().unwrap_or("partition holds a partial fixture"));
            RunOutcome::ok()
        }
        Err(err) => {
            println!("built-in tests failed on data in {}: {err}", dir.display());
            RunOutcome::ok()
        }
    }
}

fn print_selftest(report: &SelfTestReport) {
    for check in report.failures() {
        match check.hits {
            Some(hits) => println!(
                "query \"{}\" on {} build-in records found {hits} hits, but {} were expected",
                check.condition, report.rows, check.expected
            ),
            None => println!(
                "failed to process query \"{}\" on data in {}",
                check.condition,
                report.dir.display()
            ),
        }
    }
    println!("Build-in tests finished with nerrors = {}", report.nerrors());
}

fn build_indexes(session: &Session, dir: &Path, level: i32) -> RunOutcome {
    match session.build_indexes(dir, None) {
        Ok(built) => {
            if level > 0 {
                println!("build_indexes on {} returned {built}", dir.display());
            }
        }
        Err(err) => println!("failed to build indexes on data in {}: {err}", dir.display()),
    }
    RunOutcome::ok()
}

fn run_query(session: &Session, dir: &Path, conditions: &str, columns: &[String]) -> RunOutcome {
    let query = match session.build_query(None, dir, Some(conditions)) {
        Ok(query) => query,
        Err(err) => {
            tracing::error!(error = %err, "query failed");
            println!(
                "failed to process query \"{conditions}\" on data in {}",
                dir.display()
            );
            return RunOutcome::ok();
        }
    };

    let nhits = query.result_rows();
    println!(
        "\napplying \"{conditions}\" on data in {} produced {nhits} hits",
        dir.display()
    );

    for pair in columns.chunks(2) {
        let name = &pair[0];
        let tag = pair
            .get(1)
            .and_then(|text| text.chars().next())
            .unwrap_or('i');
        let printed = match tag {
            'l' | 'L' => print_values::<i64>(&query, name),
            'f' | 'F' | 'r' | 'R' => print_values::<f32>(&query, name),
            'd' | 'D' => print_values::<f64>(&query, name),
            _ => print_values::<i32>(&query, name),
        };
        if let Err(err) = printed {
            tracing::debug!(column = %name, error = %err, "retrieval failed");
        }
    }

    query.destroy();
    RunOutcome::ok()
}

fn print_values<T: Qualified>(query: &QueryHandle, name: &str) -> Result<(), Error> {
    match query.qualified::<T>(name) {
        Ok(values) => {
            let mut line = format!("{name}[{}]:", values.len());
            for value in &values {
                line.push_str(&format!(" {value}"));
            }
            println!("{line}");
            Ok(())
        }
        Err(err) => {
            println!(
                "** failed to retrieve values for column {name} (requested type {})",
                T::TAG
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, normalize_args};
    use clap::Parser;
    use std::ffi::OsString;

    fn normalize(args: &[&str]) -> (Vec<String>, Vec<String>) {
        let normalized = normalize_args(args.iter().map(OsString::from));
        let args = normalized
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        (args, normalized.unknown)
    }

    #[test]
    fn flags_match_on_second_character() {
        let (args, unknown) = normalize(&[
            "bitsel", "-Conf", "my.rc", "-verbose", "-3", "-m", "-x", "-H", "data", "a<5",
        ]);
        assert_eq!(
            args,
            vec![
                "bitsel",
                "--conf",
                "my.rc",
                "--verbose=-3",
                "--verbose=1",
                "--usage",
                "--",
                "data",
                "a<5"
            ]
        );
        assert_eq!(unknown, vec!["-x"]);
    }

    #[test]
    fn trailing_conf_flag_is_ignored() {
        let (args, _) = normalize(&["bitsel", "-v", "2", "-c"]);
        assert_eq!(args, vec!["bitsel", "--verbose=2", "--"]);
    }

    #[test]
    fn scanning_stops_at_first_positional() {
        let (args, unknown) = normalize(&["bitsel", "data", "-v"]);
        assert_eq!(args, vec!["bitsel", "--", "data", "-v"]);
        assert!(unknown.is_empty());
    }

    #[test]
    fn normalized_args_parse() {
        let normalized = normalize_args(
            ["bitsel", "-v", "-v", "4", "dir", "a < 3", "a", "i", "b"]
                .iter()
                .map(OsString::from),
        );
        let cli = Cli::try_parse_from(normalized.args).unwrap();
        assert_eq!(cli.verbose.iter().sum::<i32>(), 5);
        assert_eq!(cli.datadir.unwrap().to_str(), Some("dir"));
        assert_eq!(cli.conditions.as_deref(), Some("a < 3"));
        assert_eq!(cli.columns, vec!["a", "i", "b"]);
    }
}
