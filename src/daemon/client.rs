//! IPC client for communicating with the daemon

use anyhow::{Context, Result};
use tokio::net::UnixStream;

use crate::config::Settings;
use crate::daemon::ipc::{decode, read_frame, write_message, DaemonRequest, DaemonResponse};

/// Client for communicating with the daemon
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let socket_path = settings.socket_path();

        let stream = UnixStream::connect(&socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to daemon at {:?}. Is the daemon running? Try: neurocare daemon start",
                    socket_path
                )
            })?;

        Ok(Self { stream })
    }

    /// Send a request and wait for response
    pub async fn send(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        write_message(&mut self.stream, &request).await?;

        let Some(body) = read_frame(&mut self.stream).await? else {
            anyhow::bail!("Daemon closed the connection before answering");
        };
        let response = decode(&body).context("Failed to parse daemon response")?;

        Ok(response)
    }
}
