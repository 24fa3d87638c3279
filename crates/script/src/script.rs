// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loaded scripts and the static inspector.

use crate::directive::ScheduleDirective;
use crate::parser::parse_script;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script file {0} does not exist")]
    Missing(PathBuf),

    #[error("HCL parse error: {0}")]
    Parse(#[from] hcl::Error),

    #[error("script {script} declares no entrypoints")]
    NoEntrypoints { script: PathBuf },

    #[error("script {script} has an entrypoint block without a name label")]
    UnnamedEntrypoint { script: PathBuf },

    #[error("entrypoint '{entrypoint}' in {script} has no run body")]
    MissingRun {
        script: PathBuf,
        entrypoint: String,
    },

    #[error("script {script} does not have an entrypoint '{entrypoint}'")]
    EntrypointNotFound {
        script: PathBuf,
        entrypoint: String,
    },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One entrypoint of a process script.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrypointDef {
    pub name: String,
    pub doc: Option<String>,
    pub schedule: Option<ScheduleDirective>,
    /// Shell body executed by the runner.
    pub run: String,
}

impl EntrypointDef {
    /// The schedule directive with defaults and the waiter rule applied.
    pub fn directive(&self) -> ScheduleDirective {
        self.schedule.clone().unwrap_or_default().resolved()
    }
}

/// A parsed process script.
///
/// Loading is uncached on purpose: every task reloads its script so a
/// stale in-memory copy can never outlive an edit, and kernel-session
/// state tied to a previous run never leaks into the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub path: PathBuf,
    pub entrypoints: IndexMap<String, EntrypointDef>,
}

impl Script {
    /// Load and parse the script at `path`.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        if !path.is_file() {
            return Err(ScriptError::Missing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_script(&content, path)
    }

    pub fn entrypoint(&self, name: &str) -> Option<&EntrypointDef> {
        self.entrypoints.get(name)
    }

    /// The entrypoint or a client-visible error.
    pub fn require_entrypoint(&self, name: &str) -> Result<&EntrypointDef, ScriptError> {
        self.entrypoint(name)
            .ok_or_else(|| ScriptError::EntrypointNotFound {
                script: self.path.clone(),
                entrypoint: name.to_string(),
            })
    }

    /// Names of all declared entrypoints, in declaration order.
    pub fn entrypoint_names(&self) -> Vec<&str> {
        self.entrypoints.keys().map(String::as_str).collect()
    }
}

/// Static inspection used by the submission path: verify the entrypoint
/// exists and return its resolved schedule directive, without running
/// anything.
pub fn inspect(path: &Path, entrypoint: &str) -> Result<ScheduleDirective, ScriptError> {
    let script = Script::load(path)?;
    let def = script.require_entrypoint(entrypoint)?;
    Ok(def.directive())
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
