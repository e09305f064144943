// crates/state/src/txn.rs
//! File transactions with pre-image rollback.
//!
//! Staged operations capture the target's current content at staging
//! time. `commit` applies them in order; if any application fails, the
//! already-applied prefix is undone in reverse using the pre-images, so a
//! failed commit leaves the tree as it was.

use std::fs;
use std::path::{Path, PathBuf};

use redline_types::StateError;
use tracing::{debug, warn};

#[derive(Debug)]
enum StagedOp {
    Write {
        path: PathBuf,
        data: Vec<u8>,
        pre_image: Option<Vec<u8>>,
    },
    Delete {
        path: PathBuf,
        pre_image: Option<Vec<u8>>,
    },
}

impl StagedOp {
    fn path(&self) -> &Path {
        match self {
            StagedOp::Write { path, .. } | StagedOp::Delete { path, .. } => path,
        }
    }
}

/// A write transaction over files beneath one root.
#[derive(Debug, Default)]
pub struct FileTransaction {
    ops: Vec<StagedOp>,
}

impl FileTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read through the transaction: staged content wins over disk.
    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        for op in self.ops.iter().rev() {
            if op.path() == path {
                return match op {
                    StagedOp::Write { data, .. } => Some(data.clone()),
                    StagedOp::Delete { .. } => None,
                };
            }
        }
        fs::read(path).ok()
    }

    /// Stage a write, capturing the pre-image now.
    pub fn write(&mut self, path: impl Into<PathBuf>, data: Vec<u8>) {
        let path = path.into();
        let pre_image = fs::read(&path).ok();
        self.ops.push(StagedOp::Write {
            path,
            data,
            pre_image,
        });
    }

    /// Stage a delete, capturing the pre-image now.
    pub fn delete(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let pre_image = fs::read(&path).ok();
        self.ops.push(StagedOp::Delete { path, pre_image });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discard everything staged.
    pub fn rollback(self) {
        debug!(staged = self.ops.len(), "transaction rolled back unapplied");
    }

    /// Apply all staged operations in order. On failure, undo the applied
    /// prefix in reverse and surface the original error.
    pub fn commit(self) -> Result<(), StateError> {
        let mut applied: Vec<&StagedOp> = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            let result = match op {
                StagedOp::Write { path, data, .. } => atomic_write(path, data),
                StagedOp::Delete { path, .. } => match fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(()) => applied.push(op),
                Err(source) => {
                    let path = op.path().to_path_buf();
                    warn!(path = %path.display(), "commit failed; rolling back");
                    for undone in applied.into_iter().rev() {
                        restore(undone);
                    }
                    return Err(StateError::WriteFailed {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }
}

fn restore(op: &StagedOp) {
    let (path, pre_image) = match op {
        StagedOp::Write { path, pre_image, .. } | StagedOp::Delete { path, pre_image } => {
            (path, pre_image)
        }
    };
    let result = match pre_image {
        Some(bytes) => atomic_write(path, bytes),
        None => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
    };
    if let Err(e) = result {
        // Rollback is best-effort; recovery re-verifies checksums anyway.
        warn!(path = %path.display(), error = %e, "pre-image restore failed");
    }
}

/// Write via a sibling temp file and rename, so readers never observe a
/// half-written file.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}
