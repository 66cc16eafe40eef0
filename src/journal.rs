//! Append-only JSONL journal of fetch output, one file per `(data_type,
//! fetch_type)` pair, with a companion `.index` file tracking which keys
//! have already been appended so re-runs don't duplicate lines. Kept
//! independent of the database so a record of exactly what was fetched
//! survives even if a later pipeline stage fails.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Filter,
    Normal,
}

impl DataType {
    fn as_str(&self) -> &'static str {
        match self {
            DataType::Filter => "filter",
            DataType::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    Live,
    Hist,
}

impl FetchType {
    fn as_str(&self) -> &'static str {
        match self {
            FetchType::Live => "live",
            FetchType::Hist => "hist",
        }
    }
}

pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn journal_path(&self, data_type: DataType, fetch_type: FetchType) -> PathBuf {
        self.dir
            .join(format!("{}_{}.jsonl", data_type.as_str(), fetch_type.as_str()))
    }

    fn index_path(&self, data_type: DataType, fetch_type: FetchType) -> PathBuf {
        self.dir
            .join(format!("{}_{}.index", data_type.as_str(), fetch_type.as_str()))
    }

    fn load_index(path: &Path) -> Result<HashSet<String>> {
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut keys = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            if !line.is_empty() {
                keys.insert(line);
            }
        }
        Ok(keys)
    }

    /// Appends every record in `records` whose `key` isn't already present
    /// in the index, writing both the JSONL line and the index entry.
    /// Returns the number of records actually appended.
    pub fn append<T: Serialize>(
        &self,
        data_type: DataType,
        fetch_type: FetchType,
        records: &[(String, T)],
    ) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating journal directory {}", self.dir.display()))?;

        let index_path = self.index_path(data_type, fetch_type);
        let mut seen = Self::load_index(&index_path)?;

        let journal_path = self.journal_path(data_type, fetch_type);
        let mut journal_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .with_context(|| format!("opening journal {}", journal_path.display()))?;
        let mut index_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .with_context(|| format!("opening journal index {}", index_path.display()))?;

        let mut appended = 0usize;
        for (key, record) in records {
            if seen.contains(key) {
                continue;
            }
            let line = serde_json::to_string(record)?;
            writeln!(journal_file, "{line}")?;
            writeln!(index_file, "{key}")?;
            seen.insert(key.clone());
            appended += 1;
        }

        debug!(
            appended,
            requested = records.len(),
            data_type = data_type.as_str(),
            fetch_type = fetch_type.as_str(),
            "journal append"
        );
        Ok(appended)
    }
}
