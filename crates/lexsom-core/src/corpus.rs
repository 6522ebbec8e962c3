//! Loading pre-embedded documents from a directory.
//!
//! `.json` files hold one record or an array of records; `.jsonl` files hold one record
//! per line. Hidden files and directories are skipped.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::document::EmbeddingVector;

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonRecords {
    Many(Vec<EmbeddingVector>),
    One(EmbeddingVector),
}

/// Scans `root` for `.json` and `.jsonl` files and returns every record, in path order.
/// Does not follow symlinks into directories (walkdir default).
pub fn scan_corpus(root: &Path) -> Result<Vec<EmbeddingVector>, CorpusError> {
    if !root.is_dir() {
        return Err(CorpusError::NotADirectory(root.to_path_buf()));
    }
    let mut records = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| CorpusError::Walk(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => records.extend(read_json(path)?),
            Some("jsonl") => records.extend(read_jsonl(path)?),
            _ => {}
        }
    }
    Ok(records)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn read_json(path: &Path) -> Result<Vec<EmbeddingVector>, CorpusError> {
    let raw = std::fs::read_to_string(path).map_err(|e| CorpusError::Read(path.to_path_buf(), e))?;
    let parsed: JsonRecords =
        serde_json::from_str(&raw).map_err(|e| CorpusError::Parse(path.to_path_buf(), e))?;
    Ok(match parsed {
        JsonRecords::Many(records) => records,
        JsonRecords::One(record) => vec![record],
    })
}

fn read_jsonl(path: &Path) -> Result<Vec<EmbeddingVector>, CorpusError> {
    let raw = std::fs::read_to_string(path).map_err(|e| CorpusError::Read(path.to_path_buf(), e))?;
    let mut records = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| CorpusError::ParseLine {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}


#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("parse error in {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("parse error in {path} line {line}: {source}")]
    ParseLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}
