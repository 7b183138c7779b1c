//! vidbooth-cli — operator CLI for the Vidbooth kiosk API
//!
//! Drives the full session lifecycle from a terminal, which is how booth
//! installs get smoke-tested without a kiosk device on hand.
//!
//! # Subcommands
//! - `status`                                — server liveness + session count
//! - `start`                                 — begin a recording session
//! - `stop <session-id> [--video <path>]`    — finish a session, print the QR link
//! - `session <session-id>`                  — dump the session snapshot
//! - `download <session-id> [-o <path>]`     — fetch the stored video

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "vidbooth-cli",
    version,
    about = "Vidbooth kiosk API — operator CLI"
)]
struct Cli {
    /// Vidbooth HTTP server URL (overrides VIDBOOTH_URL env var)
    #[arg(long, env = "VIDBOOTH_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server liveness and the active session count
    Status,

    /// Begin a recording session
    Start,

    /// Finish a session, optionally uploading a captured video
    Stop {
        /// Session id returned by `start`
        session_id: String,

        /// Video file to upload as the session's capture
        #[arg(long)]
        video: Option<PathBuf>,
    },

    /// Dump a session snapshot
    Session {
        /// Session id to inspect
        session_id: String,
    },

    /// Download a session's stored video
    Download {
        /// Session id to fetch
        session_id: String,

        /// Output path (defaults to kiosk-video-<id>.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Helpers
// ============================================================================

/// Default download target mirrors the filename the server derives.
pub fn derive_output_path(session_id: &str, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(format!("kiosk-video-{}.mp4", session_id)))
}

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request, exiting with the server's error body on failure.
fn expect_success(
    resp: Result<reqwest::blocking::Response, reqwest::Error>,
    url: &str,
) -> reqwest::blocking::Response {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("vidbooth-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("vidbooth-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    resp
}

fn parse_json(resp: reqwest::blocking::Response) -> Value {
    match resp.json() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("vidbooth-cli: failed to parse response: {}", e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/health", server);
    let resp = expect_success(client(10)?.get(&url).send(), &url);
    let body = parse_json(resp);

    println!("Vidbooth server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Active sessions: {}", body["activeSessions"].as_u64().unwrap_or(0));
    Ok(())
}

fn do_start(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/start-recording", server);
    let resp = expect_success(client(10)?.post(&url).send(), &url);
    let body = parse_json(resp);

    println!("{}", body["sessionId"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_stop(server: &str, session_id: &str, video: Option<PathBuf>) -> anyhow::Result<()> {
    let url = format!("{}/api/stop-recording/{}", server, session_id);
    let request = client(120)?.post(&url);

    let request = match video {
        Some(path) => {
            let bytes = std::fs::read(&path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "capture.mp4".to_string());
            let part = reqwest::blocking::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("video/mp4")?;
            request.multipart(reqwest::blocking::multipart::Form::new().part("video", part))
        }
        None => request,
    };

    let resp = expect_success(request.send(), &url);
    let body = parse_json(resp);

    println!("Download URL: {}", body["downloadUrl"].as_str().unwrap_or("?"));
    let qr_len = body["qrCode"].as_str().map(str::len).unwrap_or(0);
    println!("QR payload:   {} bytes (base64 PNG data URL)", qr_len);
    Ok(())
}

fn do_session(server: &str, session_id: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/session/{}", server, session_id);
    let resp = expect_success(client(10)?.get(&url).send(), &url);
    let body = parse_json(resp);

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn do_download(server: &str, session_id: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let url = format!("{}/api/download/{}", server, session_id);
    let resp = expect_success(client(300)?.get(&url).send(), &url);

    let target = derive_output_path(session_id, output);
    let bytes = resp.bytes()?;
    std::fs::write(&target, &bytes)
        .map_err(|e| anyhow::anyhow!("cannot write {}: {}", target.display(), e))?;

    println!("Saved {} bytes to {}", bytes.len(), target.display());
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Start => do_start(&server),
        Commands::Stop { session_id, video } => do_stop(&server, &session_id, video),
        Commands::Session { session_id } => do_session(&server, &session_id),
        Commands::Download { session_id, output } => do_download(&server, &session_id, output),
    };

    if let Err(e) = result {
        eprintln!("vidbooth-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
