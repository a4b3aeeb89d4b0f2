//! Purpose: Read `name = value` resource files that tune logging and indexing.
//! Exports: `Config`, `RC_ENV`.
//! Role: Loaded once per session; later entries override earlier ones.
//! Invariants: Names compare case-insensitively with `common.`/`all.` prefixes dropped.
//! Invariants: A missing resource file is never an error.
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};

pub const RC_ENV: &str = "BITSELRC";

#[derive(Clone, Debug, Default)]
pub struct Config {
    entries: Vec<(String, String)>,
    source: Option<PathBuf>,
}

impl Config {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                tracing::trace!(line = lineno + 1, "skipping resource line without '='");
                continue;
            };
            let name = normalize_name(name);
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"').to_string();
            entries.push((name, value));
        }
        Self {
            entries,
            source: None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|err| {
            Error::io(err, path).with_message("failed to read resource file")
        })?;
        let mut config = Self::parse(&text);
        config.source = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), entries = config.entries.len(), "read resource file");
        Ok(config)
    }

    /// Loads the first usable file of: `explicit`, `$BITSELRC`, `./bitsel.rc`,
    /// `./.bitselrc`, `$HOME/.bitselrc`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        match search_paths(explicit).into_iter().find(|path| usable(path)) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::empty()),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = normalize_name(name);
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((normalize_name(name), value.into()));
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.get("logFile")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }

    /// Extra verbosity added to the level requested on the command line.
    pub fn verboseness(&self) -> Result<i32, Error> {
        match self.get("verboseness") {
            None => Ok(0),
            Some(value) if value.is_empty() => Ok(0),
            Some(value) => value.parse::<i32>().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("verboseness must be an integer, got \"{value}\""))
            }),
        }
    }

    /// Index specification configured for `partition` alone.
    pub fn partition_index(&self, partition: &str) -> Option<&str> {
        self.get(&format!("{partition}.index"))
    }

    pub fn default_index(&self) -> Option<&str> {
        self.get("index")
    }
}

fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let lower = name.to_ascii_lowercase();
    for prefix in ["common.", "all."] {
        if lower.starts_with(prefix) {
            return name[prefix.len()..].to_string();
        }
    }
    name.to_string()
}

fn usable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(RC_ENV).filter(|value| !value.is_empty()) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("bitsel.rc"));
    paths.push(PathBuf::from(".bitselrc"));
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".bitselrc"));
    }
    paths
}
