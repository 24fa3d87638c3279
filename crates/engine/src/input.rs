// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input staging: archive extraction and root-file resolution.

use crate::error::EngineError;
use lathe_core::Clock;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Extensions recognized as 3D payloads when auto-resolving the root
/// file of an extracted archive.
const FORMAT_WHITELIST: [&str; 75] = [
    "pxz", "3ds", "acis", "sat", "sab", "dwg", "dxf", "wire", "fbx", "ipt", "iam", "nwd", "nwc",
    "rvt", "rfa", "rcp", "rcs", "vpb", "catpart", "catproduct", "catshape", "cgr", "3dxml", "asm",
    "neu", "prt", "xas", "xpr", "pvs", "pvz", "csb", "gltf", "glb", "gds", "ifc", "igs", "iges",
    "jt", "obj", "x_b", "x_t", "p_t", "p_b", "xmt", "xmt_txt", "xmt_bin", "pdf", "plmxml", "e57",
    "pts", "ptx", "prc", "3dm", "rvm", "skp", "par", "pwd", "psm", "sldasm", "sldprt", "stp",
    "step", "stpz", "stepz", "stpx", "stpxz", "stl", "u3d", "usd", "usdz", "usda", "usdc", "vda",
    "wrl", "vrml",
];

/// A staged input: the resolved file to feed the script, plus the
/// extraction directory keeping it alive when the input was an archive.
#[derive(Debug)]
pub struct StagedInput {
    extract_dir: Option<TempDir>,
    pub file: Option<PathBuf>,
}

impl StagedInput {
    pub fn empty() -> Self {
        Self {
            extract_dir: None,
            file: None,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.extract_dir.as_ref().map(TempDir::path)
    }
}

fn is_archive(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    name.ends_with(".zip") || name.ends_with(".tar.gz")
}

/// Stage the task input.
///
/// Plain files pass through; archives are extracted to a scratch
/// directory and the root file resolved — `root_file` when the caller
/// supplied one (`..` rejected), else the first file carrying a
/// whitelisted 3D extension.
pub fn stage_input<C: Clock>(
    data: Option<&Path>,
    root_file: Option<&str>,
    progress: &mut crate::progress::ProgressTracker<C>,
) -> Result<StagedInput, EngineError> {
    let Some(data) = data else {
        return Ok(StagedInput::empty());
    };

    if let Some(root) = root_file {
        if root.contains("..") {
            return Err(EngineError::SecurityViolation(format!(
                "root_file contains invalid characters: {}",
                root
            )));
        }
    }

    if !data.exists() {
        return Err(EngineError::FileNotFound(format!(
            "{} not found on the shared storage",
            data.display()
        )));
    }

    if !is_archive(data) {
        info!(input = %data.display(), "using input file directly");
        return Ok(StagedInput {
            extract_dir: None,
            file: Some(data.to_path_buf()),
        });
    }

    let extract_dir = TempDir::new()?;
    let _ = progress.next("Extracting archive", None);
    debug!(archive = %data.display(), dst = %extract_dir.path().display(), "extracting");
    extract_archive(data, extract_dir.path())?;

    let target = match root_file {
        Some(root) => extract_dir.path().join(root),
        None => first_3d_file(extract_dir.path()).unwrap_or_else(|| extract_dir.path().join("")),
    };

    if !target.is_file() {
        return Err(EngineError::FileNotFound(format!(
            "no 3D file found in {}",
            data.display()
        )));
    }

    info!(input = %target.display(), "using extracted root file");
    Ok(StagedInput {
        extract_dir: Some(extract_dir),
        file: Some(target),
    })
}

fn extract_archive(archive: &Path, dst: &Path) -> Result<(), EngineError> {
    let name = archive.to_string_lossy().to_lowercase();
    if name.ends_with(".zip") {
        let file = File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| EngineError::Archive(format!("bad zip {}: {}", archive.display(), e)))?;
        zip.extract(dst)
            .map_err(|e| EngineError::Archive(format!("extract {}: {}", archive.display(), e)))?;
    } else {
        let file = File::open(archive)?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(decoder);
        tar.unpack(dst)?;
    }
    Ok(())
}

/// Depth-first scan for the first file with a whitelisted extension.
/// Entries are visited in sorted order so resolution is deterministic.
fn first_3d_file(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        if path.is_file() && has_whitelisted_extension(path) {
            return Some(path.clone());
        }
    }
    for path in &entries {
        if path.is_dir() {
            if let Some(found) = first_3d_file(path) {
                return Some(found);
            }
        }
    }
    None
}

fn has_whitelisted_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FORMAT_WHITELIST.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
