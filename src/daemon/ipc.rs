//! IPC protocol definitions for daemon communication
//!
//! Every message is a little-endian `u32` length followed by that many bytes
//! of JSON.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::workflow::{WorkflowEvent, WorkflowSnapshot};

/// Largest message either side accepts
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Request sent from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonRequest {
    /// Open a booking for the signed-in user, replacing a finished one
    OpenBooking,

    /// Apply an event to the hosted booking
    Booking { event: WorkflowEvent },

    /// Current view of the hosted booking
    GetBooking,

    /// Get current status
    GetStatus,

    /// Ping to check if daemon is alive
    Ping,

    /// Shutdown the daemon
    Shutdown,
}

/// Response sent from the daemon to the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonResponse {
    /// The hosted booking after the request was applied
    Booking(WorkflowSnapshot),

    /// Current status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Acknowledgment (for shutdown, etc.)
    Ok,

    /// Error response
    Error { message: String },
}

/// What the daemon is doing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub uptime_secs: u64,
    /// Owner of the microphone, if anyone holds it
    pub mic_holder: Option<String>,
    pub analysis_backend: String,
    pub booking: Option<WorkflowSnapshot>,
}

/// Encode a message as one length-prefixed frame
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(message).context("Failed to encode message")?;
    if json.len() > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes", json.len());
    }
    let mut bytes = (json.len() as u32).to_le_bytes().to_vec();
    bytes.extend(json);
    Ok(bytes)
}

/// Decode the JSON body of a frame
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).context("Failed to decode message")
}

/// Write one framed message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    writer.write_all(&encode(message)?).await?;
    Ok(())
}

/// Read the body of one frame. `None` when the peer hung up between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("Message too large: {} bytes", len);
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .context("Connection closed mid-message")?;
    Ok(Some(body))
}
