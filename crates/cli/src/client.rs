// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket client for the daemon protocol.

use anyhow::{anyhow, bail, Context, Result};
use lathe_daemon::wire::{self, DEFAULT_TIMEOUT};
use lathe_daemon::{Request, Response};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

pub struct Client {
    socket_path: PathBuf,
    api_key: String,
}

impl Client {
    pub fn new(socket_path: PathBuf, api_key: String) -> Self {
        Self {
            socket_path,
            api_key,
        }
    }

    pub fn api_key(&self) -> String {
        self.api_key.clone()
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "cannot reach lathed at {} (is the daemon running?)",
                    self.socket_path.display()
                )
            })
    }

    /// One request, one response.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let stream = self.connect().await?;
        let (mut reader, mut writer) = stream.into_split();
        let encoded = wire::encode(&request)?;
        wire::write_message(&mut writer, &encoded).await?;
        let bytes = wire::read_message(&mut reader).await?;
        Ok(wire::decode(&bytes)?)
    }

    /// Submit a job, streaming the declared uploads after the request.
    pub async fn submit(
        &self,
        request: Request,
        file: Option<&Path>,
        script: Option<&Path>,
    ) -> Result<Response> {
        let stream = self.connect().await?;
        let (mut reader, mut writer) = stream.into_split();
        let encoded = wire::encode(&request)?;
        wire::write_message(&mut writer, &encoded).await?;
        if let Some(file) = file {
            wire::write_file_stream(&mut writer, file)
                .await
                .with_context(|| format!("uploading {}", file.display()))?;
        }
        if let Some(script) = script {
            wire::write_file_stream(&mut writer, script)
                .await
                .with_context(|| format!("uploading {}", script.display()))?;
        }
        let bytes = wire::read_message(&mut reader).await?;
        Ok(wire::decode(&bytes)?)
    }

    /// Download a streamed file into `dst`. Returns (name, bytes).
    pub async fn download(&self, request: Request, dst: &Path) -> Result<(String, u64)> {
        let stream = self.connect().await?;
        let (mut reader, mut writer) = stream.into_split();
        let encoded = wire::encode(&request)?;
        wire::write_message(&mut writer, &encoded).await?;

        let bytes = tokio::time::timeout(DEFAULT_TIMEOUT, wire::read_message(&mut reader))
            .await
            .map_err(|_| anyhow!("timed out waiting for the daemon"))??;
        match wire::decode::<Response>(&bytes)? {
            Response::FileHeader { name, size } => {
                let received = wire::read_file_stream(&mut reader, dst).await?;
                if received != size {
                    bail!("short read: got {} of {} bytes", received, size);
                }
                Ok((name, received))
            }
            Response::Error { error } => bail!("{} ({})", error.message, describe(&error)),
            other => bail!("unexpected response: {:?}", other),
        }
    }
}

pub fn describe(error: &lathe_daemon::ApiError) -> String {
    match &error.details {
        Some(details) => format!("{}: {}", error.code, details),
        None => error.code.to_string(),
    }
}

/// Unwrap an error response into an anyhow error.
pub fn expect_ok(response: Response) -> Result<Response> {
    match response {
        Response::Error { error } => bail!("{} ({})", error.message, describe(&error)),
        other => Ok(other),
    }
}
