//! NVR Configuration Backup Tool
//!
//! Local backups of the appliance configuration with optional cloud copies.

// nvrbackup/src/main.rs
mod backup;
mod catalog;
mod cloud;
mod config;
mod errors;
mod restore;
mod service;
mod store;
mod utils;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use config::AppConfig;
use serde::Serialize;
use service::{BackupService, CloudSyncRequest};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_WATCH_SECS: u64 = 60;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run_app().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs one command and reports whether its outcome was ok.
async fn run_app() -> Result<bool> {
    // config.json is looked up in the working directory; a missing file means defaults.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path)
        .context(format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let service = BackupService::from_config(&app_config).context("Failed to initialise backup service")?;

    match args.as_slice() {
        ["list"] => {
            let records = service.list_backups().await.context("Failed to list backups")?;
            print_json(&records)?;
            Ok(true)
        }
        ["backup"] => {
            let outcome = service.run_backup().await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["restore", filename] => {
            let outcome = service.restore(filename).await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["fetch", filename, dest] => {
            let bytes = service
                .fetch(filename)
                .with_context(|| format!("Failed to fetch {filename}"))?;
            utils::atomic_write(Path::new(dest), &bytes)
                .with_context(|| format!("Failed to write {dest}"))?;
            info!("✓ Wrote {} bytes to {}", bytes.len(), dest);
            Ok(true)
        }
        ["delete", filename] => {
            let outcome = service.delete(filename, false).await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["delete", filename, "--remote"] => {
            let outcome = service.delete(filename, true).await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["pull", filename] => {
            let outcome = service.pull(filename).await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["purge"] => {
            let outcome = service.purge().await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["status"] => {
            print_json(&service.cloud_status())?;
            Ok(true)
        }
        ["cloud", "enable"] => {
            let outcome = service
                .configure_cloud(CloudSyncRequest {
                    enabled: true,
                    credential: None,
                })
                .await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["cloud", "enable", credential_file] => {
            let payload = fs::read(credential_file)
                .with_context(|| format!("Failed to read credential file {credential_file}"))?;
            let outcome = service.upload_credential_file(&payload).await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["cloud", "disable"] => {
            let outcome = service
                .configure_cloud(CloudSyncRequest {
                    enabled: false,
                    credential: None,
                })
                .await;
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["cloud", "clear"] => {
            let outcome = service.clear_cloud();
            print_json(&outcome)?;
            Ok(outcome.ok)
        }
        ["watch"] => watch(&service, DEFAULT_WATCH_SECS).await,
        ["watch", secs] => {
            let secs = secs
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .with_context(|| format!("Watch interval must be a positive number of seconds, got '{secs}'"))?;
            watch(&service, secs).await
        }
        _ => {
            print_usage();
            anyhow::bail!("Invalid command: {}", args.join(" "))
        }
    }
}

/// Prints the catalog every `secs` seconds until interrupted.
async fn watch(service: &BackupService, secs: u64) -> Result<bool> {
    info!("👀 Watching backups every {}s (Ctrl+C to stop)", secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let records = service.list_backups().await.context("Failed to list backups")?;
                print_json(&records)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopped watching");
                return Ok(true);
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: nvrbackup <command>");
    eprintln!("  list                          List restorable backups, newest first");
    eprintln!("  backup                        Create a backup (and upload it if cloud sync is on)");
    eprintln!("  restore <file>                Replace the live configuration with a backup");
    eprintln!("  fetch <file> <dest>           Copy a local backup archive to <dest>");
    eprintln!("  delete <file> [--remote]      Delete a backup, optionally its cloud copy too");
    eprintln!("  pull <file>                   Download a cloud-only backup");
    eprintln!("  purge                         Forget backups that exist nowhere any more");
    eprintln!("  status                        Show cloud sync status");
    eprintln!("  cloud enable [<credential>]   Enable cloud sync, optionally with a credential file");
    eprintln!("  cloud disable                 Disable cloud sync (cloud copies are kept)");
    eprintln!("  cloud clear                   Forget the stored credential");
    eprintln!("  watch [<secs>]                Print the backup list periodically");
}
