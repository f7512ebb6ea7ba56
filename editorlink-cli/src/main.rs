//! EditorLink CLI
//!
//! Command-line interface for the editor automation bridge.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use editorlink_core::{BridgeConfig, CONFIG_FILE_NAME};
use editorlink_server::run_server;

#[derive(Parser)]
#[command(name = "editorlink")]
#[command(about = "Editor automation bridge with duplicate-request coalescing")]
#[command(version)]
struct Cli {
    /// Bridge address used by client commands
    #[arg(long, global = true, default_value = "http://127.0.0.1:44780")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default editorlink.toml
    Init {
        /// Directory to initialize (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Start the bridge server (connects to the editor plugin)
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (default: editorlink.toml lookup)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Stop the running bridge server
    Stop,

    /// Show bridge health and coalescing stats
    Status,

    /// Send one automation request and print the response
    Send {
        /// Action name, e.g. blueprint_create
        action: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Request id (default: generated by the bridge)
        #[arg(long)]
        request_id: Option<String>,

        /// Client-side wait in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List operations currently in flight
    Inflight,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("editorlink=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, force } => {
            cmd_init(path, force)?;
        }
        Commands::Serve { port, config } => {
            cmd_serve(port, config).await?;
        }
        Commands::Stop => {
            cmd_stop(&cli.url).await?;
        }
        Commands::Status => {
            cmd_status(&cli.url).await?;
        }
        Commands::Send {
            action,
            payload,
            request_id,
            timeout_ms,
        } => {
            cmd_send(&cli.url, action, &payload, request_id, timeout_ms).await?;
        }
        Commands::Inflight => {
            cmd_inflight(&cli.url).await?;
        }
    }

    Ok(())
}

/// Write a default config file
fn cmd_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let dir = match path {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    std::fs::create_dir_all(&dir).context("Failed to create directory")?;

    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let content = BridgeConfig::default().to_toml_string()?;
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Wrote {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Enable the EditorLink plugin in the editor");
    println!("  2. Run: editorlink serve");

    Ok(())
}

/// Start the bridge server
async fn cmd_serve(port: Option<u16>, config: Option<PathBuf>) -> Result<()> {
    let mut config = BridgeConfig::discover(config.as_deref()).context("Failed to load config")?;
    if let Some(port) = port {
        config.server.port = port;
    }
    println!(
        "Starting EditorLink server on {}:{}...",
        config.server.host, config.server.port
    );
    println!("Stop with: editorlink stop");
    run_server(config).await
}

/// Stop the running bridge server
async fn cmd_stop(url: &str) -> Result<()> {
    let client = reqwest::Client::new();

    match client.post(format!("{}/shutdown", url)).send().await {
        Ok(response) if response.status().is_success() => {
            println!("Server stopped.");
            Ok(())
        }
        Ok(_) => {
            // Try killing by port as fallback
            println!("Server did not respond to shutdown. Trying force stop...");
            #[cfg(unix)]
            {
                let port = reqwest::Url::parse(url)
                    .ok()
                    .and_then(|u| u.port_or_known_default())
                    .unwrap_or(44780);
                let output = std::process::Command::new("lsof")
                    .args(["-ti", &format!(":{}", port)])
                    .output();
                if let Ok(output) = output {
                    let pids = String::from_utf8_lossy(&output.stdout);
                    for pid in pids.lines() {
                        if let Ok(pid) = pid.trim().parse::<i32>() {
                            unsafe {
                                libc::kill(pid, libc::SIGTERM);
                            }
                            println!("Killed process {}", pid);
                        }
                    }
                }
            }
            Ok(())
        }
        Err(_) => {
            println!("Server is not running.");
            Ok(())
        }
    }
}

/// Show status
async fn cmd_status(url: &str) -> Result<()> {
    let client = reqwest::Client::new();

    match client.get(format!("{}/health", url)).send().await {
        Ok(response) => {
            let health: serde_json::Value = response.json().await?;
            println!("Server status: {}", serde_json::to_string_pretty(&health)?);
        }
        Err(_) => {
            println!("Server is not running.");
            println!("Start it with: editorlink serve");
        }
    }

    Ok(())
}

/// Send one automation request
async fn cmd_send(
    url: &str,
    action: String,
    payload: &str,
    request_id: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;

    let mut body = serde_json::json!({
        "action": action,
        "payload": payload,
    });
    if let Some(id) = request_id {
        body["requestId"] = serde_json::Value::String(id);
    }
    if let Some(ms) = timeout_ms {
        body["timeoutMs"] = ms.into();
    }

    let response = reqwest::Client::new()
        .post(format!("{}/automation", url))
        .json(&body)
        .send()
        .await
        .context("Failed to reach EditorLink server")?;

    let status = response.status();
    let result: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !status.is_success() || result.get("success") != Some(&serde_json::Value::Bool(true)) {
        bail!("Request failed ({})", status);
    }
    Ok(())
}

/// List in-flight operations
async fn cmd_inflight(url: &str) -> Result<()> {
    let entries: Vec<serde_json::Value> = reqwest::Client::new()
        .get(format!("{}/automation/inflight", url))
        .send()
        .await
        .context("Failed to reach EditorLink server")?
        .json()
        .await?;

    if entries.is_empty() {
        println!("Nothing in flight.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  waiters={}  age={}ms",
            entry.get("key").and_then(|v| v.as_str()).unwrap_or("?"),
            entry.get("waiters").and_then(|v| v.as_u64()).unwrap_or(0),
            entry.get("ageMs").and_then(|v| v.as_u64()).unwrap_or(0),
        );
    }
    Ok(())
}
