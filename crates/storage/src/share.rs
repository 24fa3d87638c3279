// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job namespaced storage on the shared filesystem.
//!
//! Layout, rooted at the share directory:
//!
//! ```text
//! <share>/<job_id>/inputs/    uploaded files
//! <share>/<job_id>/outputs/   files the script produced
//! <share>/<job_id>/archives/  <job_id>.<ext>
//! <share>/<job_id>/states/    .<format>.state markers
//! ```
//!
//! Every path touched by untrusted input goes through [`SharedStore`] so
//! traversal cannot escape the job subtree: job ids must have the
//! canonical UUID shape, relative names may not contain `..` or be
//! absolute, and existing paths are re-checked after symlink resolution.

use lathe_core::is_valid_job_id;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Upload chunk size (1 MiB).
const UPLOAD_CHUNK: usize = 1024 * 1024;

const INPUTS: &str = "inputs";
const OUTPUTS: &str = "outputs";
const ARCHIVES: &str = "archives";
const STATES: &str = "states";

/// Errors from shared-store path resolution and I/O.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("invalid job id '{0}'")]
    InvalidJobId(String),

    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Handle on the shared storage root.
#[derive(Debug, Clone)]
pub struct SharedStore {
    root: PathBuf,
}

impl SharedStore {
    /// Open (creating if needed) the share rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ShareError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let root = fs::canonicalize(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The job's subtree root. Validates the id but does not create it.
    pub fn job_dir(&self, job_id: &str) -> Result<PathBuf, ShareError> {
        if !is_valid_job_id(job_id) {
            return Err(ShareError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.root.join(job_id))
    }

    pub fn job_exists(&self, job_id: &str) -> Result<bool, ShareError> {
        Ok(self.job_dir(job_id)?.is_dir())
    }

    /// Path of a file under the job's `inputs/`, creating the directory.
    pub fn input_path(&self, job_id: &str, name: &str) -> Result<PathBuf, ShareError> {
        self.resolve(job_id, INPUTS, name, true, false)
    }

    /// Path of a file under the job's `outputs/`.
    ///
    /// With `must_exist`, a missing target is an error; the directory is
    /// created either way so a fresh job can start writing.
    pub fn output_path(
        &self,
        job_id: &str,
        name: &str,
        must_exist: bool,
    ) -> Result<PathBuf, ShareError> {
        self.resolve(job_id, OUTPUTS, name, true, must_exist)
    }

    /// The job's output directory itself.
    pub fn output_dir(&self, job_id: &str) -> Result<PathBuf, ShareError> {
        self.resolve(job_id, OUTPUTS, "", true, false)
    }

    /// `archives/<job_id>.<ext>` for the job.
    pub fn archive_path(&self, job_id: &str, ext: &str) -> Result<PathBuf, ShareError> {
        self.resolve(job_id, ARCHIVES, &format!("{}.{}", job_id, ext), true, false)
    }

    /// `states/.<kind>.state` sentinel path for the job.
    pub fn state_path(&self, job_id: &str, kind: &str) -> Result<PathBuf, ShareError> {
        self.resolve(job_id, STATES, &format!(".{}.state", kind), true, false)
    }

    /// Plain file names in the job's `outputs/` (no subdirectory
    /// traversal).
    pub fn list_outputs(&self, job_id: &str) -> Result<Vec<String>, ShareError> {
        let dir = self.job_dir(job_id)?.join(OUTPUTS);
        if !dir.is_dir() {
            return Err(ShareError::NotFound(format!("{}/{}", job_id, OUTPUTS)));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Stream bytes into `dst` in ≥1 MiB chunks, fsync on close, and mark
    /// the file world-readable so workers on other hosts can pick it up.
    pub fn stream_upload(&self, dst: &Path, reader: &mut impl Read) -> Result<u64, ShareError> {
        self.ensure_contained(dst)?;
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(dst)?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            written += n as u64;
        }
        file.sync_all()?;
        set_world_readable(&file)?;
        debug!(dst = %dst.display(), bytes = written, "upload complete");
        Ok(written)
    }

    /// Sanity check used by the cleanup task before deleting a directory:
    /// the path must resolve inside the share AND its final component must
    /// be a job-UUID directory. Deleting files only needs containment.
    pub fn is_cleanup_safe(&self, path: &Path, is_dir: bool) -> bool {
        let Ok(resolved) = fs::canonicalize(path) else {
            return false;
        };
        if !resolved.starts_with(&self.root) {
            return false;
        }
        if !is_dir {
            return true;
        }
        resolved
            .file_name()
            .map(|name| is_valid_job_id(&name.to_string_lossy()))
            .unwrap_or(false)
            && resolved.is_dir()
    }

    /// Remove a whole job subtree. Used by tests and admin tooling; the
    /// cleanup task goes through [`Self::is_cleanup_safe`] first.
    pub fn remove_job(&self, job_id: &str) -> Result<(), ShareError> {
        let dir = self.job_dir(job_id)?;
        if dir.exists() {
            info!(job = job_id, "removing job storage");
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Resolve `<root>/<job_id>/<sub>/<name>` with containment checks.
    fn resolve(
        &self,
        job_id: &str,
        sub: &str,
        name: &str,
        create_dir: bool,
        must_exist: bool,
    ) -> Result<PathBuf, ShareError> {
        let job_dir = self.job_dir(job_id)?;
        let base = job_dir.join(sub);
        if create_dir {
            fs::create_dir_all(&base)?;
        }
        if name.is_empty() {
            return Ok(base);
        }

        let rel = Path::new(name);
        if rel.is_absolute() {
            return Err(ShareError::InvalidPath(name.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(ShareError::InvalidPath(name.to_string())),
            }
        }

        let full = base.join(rel);
        // Existing paths get the symlink-resolution check on top of the
        // lexical one.
        if full.exists() {
            self.ensure_contained_in_job(&full, &job_dir)?;
        } else if must_exist {
            return Err(ShareError::NotFound(format!("{}/{}", sub, name)));
        }
        Ok(full)
    }

    fn ensure_contained(&self, path: &Path) -> Result<(), ShareError> {
        let check = if path.exists() {
            fs::canonicalize(path)?
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| ShareError::InvalidPath(path.display().to_string()))?;
            fs::canonicalize(parent)?
        };
        if !check.starts_with(&self.root) {
            return Err(ShareError::InvalidPath(path.display().to_string()));
        }
        Ok(())
    }

    fn ensure_contained_in_job(&self, path: &Path, job_dir: &Path) -> Result<(), ShareError> {
        let resolved = fs::canonicalize(path)?;
        // The job dir exists whenever a path inside it does.
        let job_resolved = fs::canonicalize(job_dir)?;
        if !resolved.starts_with(&job_resolved) {
            return Err(ShareError::InvalidPath(path.display().to_string()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_world_readable(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_world_readable(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "share_tests.rs"]
mod tests;
