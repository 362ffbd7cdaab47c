// src/task/fingerprint.rs

//! Content fingerprints used for resume.
//!
//! A task's fingerprint covers its rendered command and, for every input,
//! the input name, the resolved value or paths, and the contents behind
//! those paths. Two runs with byte-identical commands and inputs therefore
//! produce the same fingerprint; any upstream change does not.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;
use crate::task::descriptor::{ResolvedInput, ResolvedInputs};

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash a file, or a directory tree (entries sorted by path so the digest
/// does not depend on listing order). Missing paths hash to a fixed marker.
pub fn compute_path_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    if fs.is_file(path) {
        return compute_file_hash(fs, path);
    }

    let mut hasher = Hasher::new();
    if fs.is_dir(path) {
        let mut entries: Vec<PathBuf> = fs.read_dir(path)?;
        entries.sort();
        for entry in entries {
            let name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            hasher.update(name.as_bytes());
            hasher.update(compute_path_hash(fs, &entry)?.as_bytes());
        }
    } else {
        hasher.update(b"<missing>");
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Fingerprint of a prepared task.
pub fn task_fingerprint(
    fs: &dyn FileSystem,
    command: &str,
    inputs: &ResolvedInputs,
) -> Result<String> {
    let mut hasher = Hasher::new();
    hasher.update(b"command\0");
    hasher.update(command.as_bytes());

    // BTreeMap iteration keeps input order stable.
    for (name, input) in inputs {
        hasher.update(b"\0input\0");
        hasher.update(name.as_bytes());
        match input {
            ResolvedInput::Absent => {
                hasher.update(b"\0absent");
            }
            ResolvedInput::Value(v) => {
                hasher.update(b"\0value\0");
                hasher.update(v.as_bytes());
            }
            ResolvedInput::Paths(paths) => {
                for path in paths {
                    hasher.update(b"\0path\0");
                    hasher.update(path.to_string_lossy().as_bytes());
                    hasher.update(compute_path_hash(fs, path)?.as_bytes());
                }
            }
        }
    }

    let hash = hasher.finalize().to_hex().to_string();
    debug!(hash = %hash, "computed task fingerprint");
    Ok(hash)
}
