//! Hash-stability for regenerated outputs.
//!
//! Some generators rewrite their output even when nothing changed. For paths
//! in an invocation's check-hash set we digest the file before running; if
//! the digest is the same afterwards the original access and modification
//! times are put back, so nothing downstream looks stale.

use crate::error::{BuildError, Result};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OutputSnapshot {
    path: PathBuf,
    digest: [u8; 32],
    atime: FileTime,
    mtime: FileTime,
}

impl OutputSnapshot {
    /// Snapshot `path`, or `None` when it does not exist yet.
    pub fn capture(path: &Path) -> Result<Option<Self>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BuildError::io(path, "stat", e)),
        };
        Ok(Some(Self {
            path: path.to_path_buf(),
            digest: file_digest(path)?,
            atime: FileTime::from_last_access_time(&meta),
            mtime: FileTime::from_last_modification_time(&meta),
        }))
    }

    pub fn capture_all(paths: &[PathBuf]) -> Result<Vec<Self>> {
        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(snapshot) = Self::capture(path)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put the old timestamps back if the content is byte-identical.
    /// Returns whether a restore happened.
    pub fn restore_if_unchanged(&self) -> Result<bool> {
        if !self.path.exists() || file_digest(&self.path)? != self.digest {
            return Ok(false);
        }
        debug!("{} is unchanged", self.path.display());
        filetime::set_file_times(&self.path, self.atime, self.mtime)
            .map_err(|e| BuildError::io(&self.path, "restore timestamps of", e))?;
        Ok(true)
    }
}

pub fn file_digest(path: &Path) -> Result<[u8; 32]> {
    let mut file = fs::File::open(path).map_err(|e| BuildError::io(path, "open", e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| BuildError::io(path, "read", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}
