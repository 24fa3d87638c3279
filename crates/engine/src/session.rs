// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Geometry-kernel session lifecycle.
//!
//! The kernel is a process-wide singleton: at most one live session per
//! worker process, always reset between tasks so no scene state leaks
//! from one job into the next. The worker supervisor owns the lifecycle;
//! tasks borrow a scoped handle.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

/// License configuration for the kernel.
#[derive(Debug, Clone)]
pub struct LicenseSettings {
    pub host: Option<String>,
    pub port: u16,
    /// Acquire once at worker boot instead of per task.
    pub acquire_at_start: bool,
    /// Use a floating license server rather than a node-locked license.
    pub flexlm: bool,
    /// Kernel disabled entirely (pure-orchestration deployments).
    pub disabled: bool,
}

impl Default for LicenseSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 35000,
            acquire_at_start: true,
            flexlm: false,
            disabled: false,
        }
    }
}

impl LicenseSettings {
    pub fn is_acquire_at_start(&self) -> bool {
        self.flexlm && self.acquire_at_start && !self.disabled
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("license server {host}:{port} not found, invalid or no license available")]
    LicenseUnavailable { host: String, port: u16 },

    #[error("no license server configured for a floating license")]
    NoLicenseServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Released,
    Held,
}

/// The per-process kernel session.
pub struct KernelSession {
    settings: LicenseSettings,
    state: Mutex<SessionState>,
}

impl KernelSession {
    pub fn new(settings: LicenseSettings) -> Self {
        if settings.flexlm {
            info!(
                host = ?settings.host,
                port = settings.port,
                acquire_at_start = settings.acquire_at_start,
                disabled = settings.disabled,
                "license configured for a floating license server"
            );
        } else {
            info!("license configured node-locked");
        }
        Self {
            settings,
            state: Mutex::new(SessionState::Released),
        }
    }

    pub fn settings(&self) -> &LicenseSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Boot-time initialization for acquire-at-start workers. Failure is
    /// fatal for the worker.
    pub fn initialize_at_boot(&self) -> Result<(), SessionError> {
        if !self.settings.is_acquire_at_start() {
            return Ok(());
        }
        self.initialize()
    }

    fn initialize(&self) -> Result<(), SessionError> {
        if self.settings.disabled {
            return Ok(());
        }
        if self.settings.flexlm {
            let host = self
                .settings
                .host
                .as_deref()
                .ok_or(SessionError::NoLicenseServer)?;
            info!(host, port = self.settings.port, "configuring license server");
        }
        *self.state.lock() = SessionState::Held;
        info!("kernel session initialized");
        Ok(())
    }

    /// Borrow the session for one task: acquire when not held at boot,
    /// and guarantee the reset-or-release on scope exit.
    pub fn acquire_for_task(&self) -> Result<SessionScope<'_>, SessionError> {
        if !self.settings.disabled && !self.settings.is_acquire_at_start() {
            self.initialize()?;
        }
        Ok(SessionScope { session: self })
    }

    /// Reset scene state, keeping the license.
    fn reset(&self) {
        if self.settings.disabled {
            return;
        }
        if *self.state.lock() == SessionState::Released {
            warn!("reset requested without a held session");
            return;
        }
        info!("kernel session reset");
    }

    /// Drop the session and its license token.
    pub fn release(&self) {
        if self.settings.disabled {
            return;
        }
        let mut state = self.state.lock();
        if *state == SessionState::Held {
            *state = SessionState::Released;
            info!("kernel session released");
        }
    }

    /// Shutdown hook: keep-at-start sessions reset (the next boot
    /// releases), per-task sessions release outright.
    pub fn release_at_shutdown(&self) {
        if self.settings.disabled {
            return;
        }
        if self.settings.is_acquire_at_start() {
            self.reset();
        } else {
            self.release();
        }
    }
}

/// Borrowed session for the duration of one task.
pub struct SessionScope<'a> {
    session: &'a KernelSession,
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        if self.session.settings.is_acquire_at_start() {
            self.session.reset();
        } else {
            self.session.release();
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
