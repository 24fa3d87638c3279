// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output packaging: build an archive of a job's outputs.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Supported packaging formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported archive type '{0}'")]
pub struct UnsupportedArchive(pub String);

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [ArchiveFormat::Zip, ArchiveFormat::Tar, ArchiveFormat::TarGz];

    /// File extension of the built archive.
    pub fn ext(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = UnsupportedArchive;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            // historical alias for gzipped tarballs
            "tar.gz" | "gztar" => Ok(ArchiveFormat::TarGz),
            other => Err(UnsupportedArchive(other.to_string())),
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ext())
    }
}

/// Build an archive of `src_dir`'s contents at `dst`.
///
/// `dst` must live outside `src_dir`, otherwise the archive would
/// swallow itself; callers build into a temp file and copy into place.
pub fn build_archive(
    src_dir: &Path,
    format: ArchiveFormat,
    dst: &Path,
) -> Result<(), EngineError> {
    match format {
        ArchiveFormat::Zip => build_zip(src_dir, dst),
        ArchiveFormat::Tar => {
            let file = File::create(dst)?;
            let mut builder = tar::Builder::new(file);
            builder.append_dir_all("", src_dir)?;
            builder.into_inner()?.sync_all()?;
            Ok(())
        }
        ArchiveFormat::TarGz => {
            let file = File::create(dst)?;
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all("", src_dir)?;
            builder.into_inner()?.finish()?.sync_all()?;
            Ok(())
        }
    }
}

fn build_zip(src_dir: &Path, dst: &Path) -> Result<(), EngineError> {
    let file = File::create(dst)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    add_dir_to_zip(&mut zip, src_dir, Path::new(""), options)?;
    zip.finish()
        .map_err(|e| EngineError::Archive(format!("zip finish: {}", e)))?
        .sync_all()?;
    Ok(())
}

fn add_dir_to_zip(
    zip: &mut zip::ZipWriter<File>,
    dir: &Path,
    prefix: &Path,
    options: zip::write::SimpleFileOptions,
) -> Result<(), EngineError> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = prefix.join(entry.file_name());
        let name_str = name.to_string_lossy().replace('\\', "/");
        if path.is_dir() {
            zip.add_directory(name_str, options)
                .map_err(|e| EngineError::Archive(format!("zip dir: {}", e)))?;
            add_dir_to_zip(zip, &path, &name, options)?;
        } else {
            zip.start_file(name_str, options)
                .map_err(|e| EngineError::Archive(format!("zip entry: {}", e)))?;
            let content = std::fs::read(&path)?;
            zip.write_all(&content)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "package_tests.rs"]
mod tests;
