//! Send command: forward host events from stdin to a running `spanloom serve`
//!
//! Host hook scripts pipe one JSON event per line into `spanloom send`.
//! Delivery is best-effort: an unreachable receiver is logged and the
//! command still succeeds so the host is never held up.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use spanloom_core::{HookReceiverConfig, HostEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::config::ConfigLoader;

/// Arguments for the send command
#[derive(Debug, Args)]
pub struct SendArgs {
    /// Socket path of the receiver (overrides config)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Fail instead of silently dropping events when the receiver is down
    #[arg(long)]
    pub strict: bool,
}

/// Lines forwarded and lines skipped by one send
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SendStats {
    pub sent: usize,
    pub skipped: usize,
}

/// Run the send command
pub async fn run(args: SendArgs) -> Result<()> {
    let config = ConfigLoader::load().context("loading configuration")?;
    let mut receiver = HookReceiverConfig::from(&config.receiver);
    if let Some(socket) = args.socket {
        receiver.socket_path = socket;
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let result = match connect(&receiver).await {
        Ok(mut stream) => forward(stdin, &mut stream).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(stats) => {
            debug!(sent = stats.sent, skipped = stats.skipped, "events sent");
            Ok(())
        }
        Err(e) if !args.strict => {
            warn!("Dropping host events: {:#}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
async fn connect(config: &HookReceiverConfig) -> Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(&config.socket_path)
        .await
        .with_context(|| format!("connecting to {}", config.socket_path.display()))
}

#[cfg(not(unix))]
async fn connect(config: &HookReceiverConfig) -> Result<tokio::net::TcpStream> {
    let addr = format!("127.0.0.1:{}", config.tcp_port);
    tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("connecting to {}", addr))
}

/// Copy valid event lines from `input` to `output`, one per line.
///
/// Lines that do not decode as a host event are skipped here rather than
/// sent to the receiver.
pub async fn forward<R, W>(input: R, output: &mut W) -> Result<SendStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = SendStats::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = HostEvent::from_json_line(line) {
            warn!("Skipping invalid host event: {}", e);
            stats.skipped += 1;
            continue;
        }
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        stats.sent += 1;
    }

    output.flush().await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forward_copies_valid_lines_only() {
        let input = concat!(
            r#"{"type":"session.created","id":"u1"}"#,
            "\n",
            "   \n",
            "{broken\n",
            r#"  {"type":"session.idle","id":"u1"}  "#,
            "\n",
        );
        let mut output = Vec::new();

        let stats = forward(input.as_bytes(), &mut output).await.unwrap();

        assert_eq!(stats, SendStats { sent: 2, skipped: 1 });
        let written = String::from_utf8(output).unwrap();
        assert_eq!(
            written,
            concat!(
                r#"{"type":"session.created","id":"u1"}"#,
                "\n",
                r#"{"type":"session.idle","id":"u1"}"#,
                "\n",
            )
        );
    }

    #[tokio::test]
    async fn forward_empty_input_sends_nothing() {
        let mut output = Vec::new();
        let stats = forward(&b""[..], &mut output).await.unwrap();
        assert_eq!(stats, SendStats::default());
        assert!(output.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = HookReceiverConfig {
            socket_path: dir.path().join("absent.sock"),
            ..HookReceiverConfig::default()
        };
        let err = connect(&config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("absent.sock"));
    }
}
