// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! lathe: command-line client for the lathe scheduler.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod watch;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use client::{expect_ok, Client};
use lathe_core::format_step_duration;
use lathe_daemon::env::default_socket_path;
use lathe_daemon::{Request, Response};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lathe", version, about = "Client for the lathe job scheduler")]
struct Cli {
    /// Daemon socket path (default: $LATHE_SOCKET or the runtime dir)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// API key (default: $LATHE_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the daemon is up
    Ping,

    /// List the built-in processes
    Processes,

    /// Show a process's documentation
    Doc { name: String },

    /// Submit a job
    #[command(alias = "exec")]
    Submit {
        /// Built-in process name, or "custom" with --script
        #[arg(short, long, default_value = "custom")]
        process: String,
        /// Input file to upload
        #[arg(short = 'd', long)]
        file: Option<PathBuf>,
        /// Custom process script to upload
        #[arg(short, long)]
        script: Option<PathBuf>,
        /// Process parameters (JSON string)
        #[arg(long)]
        params: Option<String>,
        /// Display alias for the job
        #[arg(short, long)]
        name: Option<String>,
        /// Worker config overrides (JSON string)
        #[arg(long)]
        config: Option<String>,
        /// Target queue (shorthand for a config override)
        #[arg(short, long)]
        queue: Option<String>,
        /// Entrypoint to run (shorthand for a config override)
        #[arg(short, long)]
        entrypoint: Option<String>,
        /// Wait for the job to finish
        #[arg(short, long)]
        watch: bool,
        /// Batch mode: print only the uuid, exit with the status code
        #[arg(short, long)]
        batch: bool,
    },

    /// List all known jobs
    Jobs,

    /// Short status of a job
    Status { uuid: String },

    /// Detailed status of a job (steps, timing, result)
    Details { uuid: String },

    /// List a job's output files
    Outputs { uuid: String },

    /// Download one output file
    Download {
        uuid: String,
        path: String,
        /// Destination (default: the file's own name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download the packaged outputs archive
    Archive {
        uuid: String,
        /// Destination (default: <uuid>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Watch a job until it finishes
    Watch {
        uuid: String,
        /// Print nothing; exit with the status code
        #[arg(short, long)]
        batch: bool,
    },

    /// Revoke a job
    Revoke { uuid: String },

    /// Sweep leftover crash beacons on the daemon host
    Watchdog,

    /// Ask the daemon to shut down
    Shutdown,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let socket = cli.socket.clone().unwrap_or_else(default_socket_path);
    let api_key = cli
        .api_key
        .clone()
        .or_else(|| std::env::var("LATHE_API_KEY").ok())
        .unwrap_or_default();
    let client = Client::new(socket, api_key);

    match run(cli.command, &client).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(command: Command, client: &Client) -> Result<i32> {
    match command {
        Command::Ping => {
            match expect_ok(client.request(Request::Ping).await?)? {
                Response::Pong { banner } => println!("{}", banner),
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Processes => {
            let response = client
                .request(Request::ListProcesses {
                    api_key: client.api_key(),
                })
                .await?;
            match expect_ok(response)? {
                Response::Processes { processes } => {
                    for name in processes {
                        println!("{}", name);
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Doc { name } => {
            let response = client
                .request(Request::ProcessDoc {
                    api_key: client.api_key(),
                    name,
                })
                .await?;
            match expect_ok(response)? {
                Response::Doc { doc } => println!("{}", doc),
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Submit {
            process,
            file,
            script,
            params,
            name,
            config,
            queue,
            entrypoint,
            watch: watch_flag,
            batch,
        } => {
            let config = merge_config_shorthands(config, queue, entrypoint)?;
            let request = Request::SubmitJob {
                api_key: client.api_key(),
                process,
                file_name: file
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                script_name: script
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
                params,
                name,
                config,
            };
            let response = client
                .submit(request, file.as_deref(), script.as_deref())
                .await?;
            let (uuid, job_name) = match response {
                Response::JobAccepted { uuid, name, .. } => (uuid, name),
                Response::Error { error } => {
                    eprintln!("error: {} ({})", error.message, client::describe(&error));
                    return Ok(if batch { watch::REJECTED_EXIT_CODE } else { 1 });
                }
                other => bail!("unexpected response: {:?}", other),
            };

            if batch {
                println!("{}", uuid);
            } else {
                match &job_name {
                    Some(name) => println!("Job [ {} ] ({}) started", uuid, name),
                    None => println!("Job [ {} ] started", uuid),
                }
            }

            if watch_flag {
                let job = watch::watch(client, &uuid, batch).await?;
                if batch {
                    return Ok(watch::exit_code(job.status));
                }
            }
            Ok(0)
        }

        Command::Jobs => {
            let response = client
                .request(Request::ListJobs {
                    api_key: client.api_key(),
                })
                .await?;
            match expect_ok(response)? {
                Response::Jobs { jobs } => {
                    for job in jobs {
                        let progress = job
                            .progress
                            .map(|p| format!("{}%", p))
                            .unwrap_or_else(|| "-".to_string());
                        let name = job.name.unwrap_or_default();
                        println!("{}  {:8}  {:>4}  {}", job.uuid, job.status, progress, name);
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Status { uuid } => {
            let response = client
                .request(Request::JobStatus {
                    api_key: client.api_key(),
                    uuid,
                })
                .await?;
            match expect_ok(response)? {
                Response::Job { job } => print_json(&job)?,
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Details { uuid } => {
            let response = client
                .request(Request::JobDetails {
                    api_key: client.api_key(),
                    uuid,
                })
                .await?;
            match expect_ok(response)? {
                Response::Details { details } => {
                    print_json(&details)?;
                    if !details.steps.is_empty() {
                        eprintln!();
                        for (index, step) in details.steps.iter().enumerate() {
                            eprintln!(
                                "  {:>2}. [{}] {}",
                                index + 1,
                                format_step_duration(step.duration),
                                step.info
                            );
                        }
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Outputs { uuid } => {
            let response = client
                .request(Request::ListOutputs {
                    api_key: client.api_key(),
                    uuid,
                })
                .await?;
            match expect_ok(response)? {
                Response::Outputs { outputs } => {
                    for name in outputs {
                        println!("{}", name);
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Download { uuid, path, output } => {
            let dst = output.unwrap_or_else(|| {
                PathBuf::from(
                    std::path::Path::new(&path)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "output.bin".to_string()),
                )
            });
            let (name, bytes) = client
                .download(
                    Request::FetchOutput {
                        api_key: client.api_key(),
                        uuid,
                        path,
                    },
                    &dst,
                )
                .await?;
            println!("{} ({} bytes) -> {}", name, bytes, dst.display());
            Ok(0)
        }

        Command::Archive { uuid, output } => {
            let dst = output.unwrap_or_else(|| PathBuf::from(format!("{}.zip", uuid)));
            let (name, bytes) = client
                .download(
                    Request::FetchArchive {
                        api_key: client.api_key(),
                        uuid,
                    },
                    &dst,
                )
                .await?;
            println!("{} ({} bytes) -> {}", name, bytes, dst.display());
            Ok(0)
        }

        Command::Watch { uuid, batch } => {
            let job = watch::watch(client, &uuid, batch).await?;
            if batch {
                Ok(watch::exit_code(job.status))
            } else {
                print_json(&job)?;
                Ok(0)
            }
        }

        Command::Revoke { uuid } => {
            let response = client
                .request(Request::Revoke {
                    api_key: client.api_key(),
                    uuid,
                })
                .await?;
            match expect_ok(response)? {
                Response::Revoked { terminating } => {
                    if terminating {
                        println!("revoked (terminating the running task)");
                    } else {
                        println!("revoked");
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Watchdog => {
            let response = client
                .request(Request::RecoverCrashed {
                    api_key: client.api_key(),
                })
                .await?;
            match expect_ok(response)? {
                Response::Recovered { tasks } => {
                    if tasks.is_empty() {
                        println!("no crashed tasks found");
                    } else {
                        for task in tasks {
                            println!("recovered {}", task);
                        }
                    }
                }
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }

        Command::Shutdown => {
            let response = client
                .request(Request::Shutdown {
                    api_key: client.api_key(),
                })
                .await?;
            match expect_ok(response)? {
                Response::ShuttingDown => println!("daemon shutting down"),
                other => bail!("unexpected response: {:?}", other),
            }
            Ok(0)
        }
    }
}

/// Fold the --queue/--entrypoint shorthands into the config JSON.
fn merge_config_shorthands(
    config: Option<String>,
    queue: Option<String>,
    entrypoint: Option<String>,
) -> Result<Option<String>> {
    if queue.is_none() && entrypoint.is_none() {
        return Ok(config);
    }
    let mut map = match config.as_deref() {
        None | Some("") => serde_json::Map::new(),
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .ok_or_else(|| anyhow::anyhow!("invalid JSON string for --config"))?,
    };
    if let Some(queue) = queue {
        map.insert("queue".to_string(), serde_json::Value::String(queue));
    }
    if let Some(entrypoint) = entrypoint {
        map.insert(
            "entrypoint".to_string(),
            serde_json::Value::String(entrypoint),
        );
    }
    Ok(Some(serde_json::Value::Object(map).to_string()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
