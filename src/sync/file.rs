//! Atomic file operations for baselines and reports.
//!
//! - Atomic writes: write to a temp file, sync to disk, then rename
//! - JSONL read/write for baseline snapshots

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write content to a file atomically.
///
/// 1. Writes content to a sibling `<name>.tmp` file
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Renames the temp file over the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = temp_path(path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Write values to a JSONL file atomically, one per line.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let mut content = String::new();
    for value in values {
        let line = serde_json::to_string(value)?;
        content.push_str(&line);
        content.push('\n');
    }
    atomic_write(path, &content)
}

/// Read every line of a JSONL file. Blank lines are skipped.
///
/// # Errors
///
/// Returns `FileNotFound` if the file is missing and `InvalidLine` with the
/// 1-based line number if a line does not parse.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.display().to_string()));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let value = serde_json::from_str(&line).map_err(|e| Error::InvalidLine {
            path: path.display().to_string(),
            line: line_num + 1,
            message: e.to_string(),
        })?;
        values.push(value);
    }

    Ok(values)
}
