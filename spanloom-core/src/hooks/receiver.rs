//! Hook receiver - listens for host events
//!
//! On Unix systems, uses a Unix domain socket for fast IPC.
//! On Windows, falls back to a TCP socket on localhost.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::HostEvent;

/// Configuration for the hook receiver
#[derive(Debug, Clone)]
pub struct HookReceiverConfig {
    /// Socket path for Unix systems
    pub socket_path: PathBuf,
    /// TCP port for Windows (fallback)
    pub tcp_port: u16,
}

impl Default for HookReceiverConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/spanloom-hooks.sock"),
            tcp_port: 7745,
        }
    }
}

/// Receiver for host events
pub struct HookReceiver {
    config: HookReceiverConfig,
    event_tx: mpsc::Sender<HostEvent>,
}

impl HookReceiver {
    /// Create a new hook receiver
    pub fn new(config: HookReceiverConfig, event_tx: mpsc::Sender<HostEvent>) -> Self {
        Self { config, event_tx }
    }

    /// Start listening for host events
    ///
    /// This spawns a background task that accepts connections and
    /// reads JSON-encoded events, one per line.
    #[cfg(unix)]
    pub async fn start(&self) -> std::io::Result<()> {
        use tokio::net::UnixListener;

        // Remove a stale socket file left by a previous run
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)?;
        info!("Hook receiver listening on {:?}", self.config.socket_path);

        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        tokio::spawn(forward_lines(stream, event_tx.clone()));
                    }
                    Err(e) => {
                        error!("Failed to accept hook connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// Start listening on TCP (for Windows or fallback)
    #[cfg(not(unix))]
    pub async fn start(&self) -> std::io::Result<()> {
        use tokio::net::TcpListener;

        let addr = format!("127.0.0.1:{}", self.config.tcp_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Hook receiver listening on {}", addr);

        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        tokio::spawn(forward_lines(stream, event_tx.clone()));
                    }
                    Err(e) => {
                        error!("Failed to accept hook connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// Get the socket path (Unix) or address (Windows)
    pub fn address(&self) -> String {
        #[cfg(unix)]
        {
            self.config.socket_path.to_string_lossy().to_string()
        }
        #[cfg(not(unix))]
        {
            format!("127.0.0.1:{}", self.config.tcp_port)
        }
    }
}

/// Read newline-delimited events from one connection into the channel.
///
/// Returns the number of events forwarded. Lines that fail to decode are
/// logged and skipped.
pub async fn forward_lines<R>(stream: R, tx: mpsc::Sender<HostEvent>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut forwarded = 0;

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match HostEvent::from_json_line(&line) {
            Ok(event) => {
                debug!("Received host event: {}", event.kind().as_str());
                if tx.send(event).await.is_err() {
                    warn!("Host event channel closed");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => {
                warn!("Failed to parse host event: {}", e);
            }
        }
    }

    forwarded
}
