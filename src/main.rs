//! SSR Bridge CLI
//!
//! Single-shot mode:
//!   ssr-bridge render <server-dir> <entries-json> [--noreload]
//!
//! Server mode (persistent process, reads from stdin):
//!   ssr-bridge serve <server-dir>
//!
//! Protocol (server mode):
//!   Request (stdin):
//!     reload
//!     [{"comp":"Page","props":{"user":"Alice"}}]
//!
//!   Response (stdout):
//!     Status:200
//!     Content-Type:text/html; charset=utf-8
//!     Length:1234
//!
//!     <!DOCTYPE html>...
//!
//! The first request line is `reload` or `noreload`. Logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use ssr_bridge::{error_response, parse_entries, BridgeConfig, Renderer, TEXT_CONTENT_TYPE};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(
    name = "ssr-bridge",
    version,
    about = "Server-side component rendering over an embedded JS runtime"
)]
struct Cli {
    /// Maximum script heap in MiB (0 = unlimited)
    #[arg(long, global = true, default_value_t = 64)]
    max_heap_mb: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render once and print the response body to stdout
    Render {
        /// Server build directory (template.html, renderfile.js, exports.js)
        server_dir: PathBuf,
        /// JSON array of entries, e.g. '[{"comp":"Page","props":{}}]'
        entries: String,
        /// Return hydration JSON instead of server-rendered HTML
        #[arg(long)]
        noreload: bool,
    },
    /// Serve render requests from stdin until it closes
    Serve {
        /// Server build directory (template.html, renderfile.js, exports.js)
        server_dir: PathBuf,
    },
}

fn bridge_config(server_dir: PathBuf, max_heap_mb: usize) -> BridgeConfig {
    BridgeConfig {
        max_heap_size: (max_heap_mb > 0).then(|| max_heap_mb * 1024 * 1024),
        ..BridgeConfig::new(server_dir)
    }
}

/// Run in single-shot mode
async fn run_single_shot(config: BridgeConfig, entries_json: &str, noreload: bool) -> Result<()> {
    let entries = parse_entries(entries_json)?;
    let renderer = Renderer::from_config(config).await?;

    let response = renderer.render(entries, noreload).await?;

    let mut stdout = std::io::stdout();
    stdout.write_all(response.body())?;
    writeln!(stdout)?;
    Ok(())
}

/// Run in server mode (persistent process, reads requests from stdin)
async fn run_server(config: BridgeConfig) -> Result<()> {
    // Script runtime and bundle are loaded once here
    let renderer = Renderer::from_config(config).await?;

    tracing::info!("Server ready, reading from stdin");
    serve(&renderer, BufReader::new(io::stdin()), &mut io::stdout()).await?;
    tracing::info!("Server shutting down");

    Ok(())
}

/// Answer requests from `reader` until it is exhausted
async fn serve<R, W>(renderer: &Renderer, reader: R, writer: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    // EOF - stdin closed, exit gracefully
    while let Some(mode_line) = lines.next_line().await? {
        let entries_line = lines.next_line().await?.unwrap_or_default();
        let response = handle_request(renderer, &mode_line, &entries_line).await;
        write_response(writer, &response).await?;
    }

    Ok(())
}

async fn handle_request(renderer: &Renderer, mode: &str, entries: &str) -> Response<Vec<u8>> {
    let noreload = match mode.trim() {
        "reload" => false,
        "noreload" => true,
        other => {
            return bad_request(format!(
                "Unknown mode '{}', expected 'reload' or 'noreload'",
                other
            ))
        }
    };

    let entries = match parse_entries(entries.trim()) {
        Ok(entries) => entries,
        Err(e) => return bad_request(e.to_string()),
    };

    match renderer.render(entries, noreload).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

fn bad_request(msg: String) -> Response<Vec<u8>> {
    let mut response = Response::new(msg.into_bytes());
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static(TEXT_CONTENT_TYPE));
    response
}

/// Write response in length-prefixed protocol
async fn write_response<W>(writer: &mut W, response: &Response<Vec<u8>>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(TEXT_CONTENT_TYPE);

    let header = format!(
        "Status:{}\nContent-Type:{}\nLength:{}\n\n",
        response.status().as_u16(),
        content_type,
        response.body().len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(response.body()).await?;
    writer.flush().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Render {
            server_dir,
            entries,
            noreload,
        } => run_single_shot(bridge_config(server_dir, cli.max_heap_mb), &entries, noreload)
            .await
            .map_err(|e| anyhow!("Render failed: {:#}", e)),
        Command::Serve { server_dir } => {
            run_server(bridge_config(server_dir, cli.max_heap_mb)).await
        }
    }
}
