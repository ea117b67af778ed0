//! Create an empty gsync store.

use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    path: PathBuf,
    created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the file exists and `force` is not set,
/// or an error if the store cannot be created.
pub fn execute(path: &Path, force: bool, json: bool) -> Result<()> {
    if path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized {
                path: path.to_path_buf(),
            });
        }
        fs::remove_file(path)?;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let _ = fs::remove_file(PathBuf::from(sidecar));
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // Schema is applied on open.
    drop(SqliteStorage::open(path)?);

    if json {
        let output = InitOutput {
            path: path.to_path_buf(),
            created: true,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized gsync store at {}", path.display());
    }
    Ok(())
}
