//! Append-only JSONL files.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use af_domain::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line. Failures surface as
    /// `PartitionUnavailable` so callers can retry them.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.unavailable(e))?;
        writeln!(file, "{json}").map_err(|e| self.unavailable(e))?;
        Ok(())
    }

    /// Read every parseable line. A missing file is an empty journal;
    /// malformed lines (e.g. a torn final write) are skipped.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(e)),
        };
        let mut out = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed journal line"
                ),
            }
        }
        Ok(out)
    }

    /// Replace the journal with `records`, via a temp file and rename.
    pub fn rewrite<'a, T, I>(&self, records: I) -> Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let tmp = self.path.with_extension("jsonl.tmp");
        let write = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            for record in records {
                let json = serde_json::to_string(record).map_err(std::io::Error::other)?;
                writeln!(f, "{json}")?;
            }
            f.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            self.unavailable(e)
        })
    }

    fn unavailable(&self, e: std::io::Error) -> Error {
        Error::PartitionUnavailable(format!("{}: {e}", self.path.display()))
    }
}
