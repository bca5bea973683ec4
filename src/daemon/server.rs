//! Unix socket IPC server for daemon communication

use anyhow::Result;
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::daemon::ipc::{decode, read_frame, write_message, DaemonRequest, DaemonResponse};

/// Command channel for the server
pub type CommandSender = mpsc::Sender<(DaemonRequest, mpsc::Sender<DaemonResponse>)>;
pub type CommandReceiver = mpsc::Receiver<(DaemonRequest, mpsc::Sender<DaemonResponse>)>;

/// IPC server that listens on a Unix socket
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Start listening on the socket
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);
        self.listener = Some(listener);

        Ok(())
    }

    /// Run the server, forwarding commands to the handler
    pub async fn run(&mut self, cmd_tx: CommandSender) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("IPC server not started"))?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, tx).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Serve one client: framed requests in, framed responses out, until it hangs up
async fn handle_connection(mut stream: UnixStream, cmd_tx: CommandSender) -> Result<()> {
    debug!("New client connection");

    while let Some(body) = read_frame(&mut stream).await? {
        let request: DaemonRequest = match decode(&body) {
            Ok(req) => req,
            Err(e) => {
                warn!("Rejected request: {:#}", e);
                let response = DaemonResponse::Error {
                    message: format!("Invalid request: {:#}", e),
                };
                write_message(&mut stream, &response).await?;
                continue;
            }
        };

        debug!("Received request: {:?}", request);

        let is_shutdown = matches!(request, DaemonRequest::Shutdown);

        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        cmd_tx.send((request, resp_tx)).await?;

        let response = resp_rx.recv().await.unwrap_or(DaemonResponse::Error {
            message: "Handler closed".to_string(),
        });

        write_message(&mut stream, &response).await?;

        if is_shutdown {
            return Ok(());
        }
    }

    debug!("Client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn answer_pings(mut cmd_rx: CommandReceiver) {
        while let Some((request, resp_tx)) = cmd_rx.recv().await {
            let response = match request {
                DaemonRequest::Ping => DaemonResponse::Pong,
                _ => DaemonResponse::Ok,
            };
            let _ = resp_tx.send(response).await;
        }
    }

    #[tokio::test]
    async fn serves_framed_requests_and_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("neurocare.sock");

        let mut server = IpcServer::new(socket_path.clone());
        server.start().await.unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        tokio::spawn(answer_pings(cmd_rx));
        let server_task = tokio::spawn(async move { server.run(cmd_tx).await });

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();

        write_message(&mut stream, &DaemonRequest::Ping).await.unwrap();
        let body = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(decode(&body).unwrap(), DaemonResponse::Pong));

        let garbage = b"{nope";
        stream
            .write_all(&(garbage.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(garbage).await.unwrap();
        let body = read_frame(&mut stream).await.unwrap().unwrap();
        match decode(&body).unwrap() {
            DaemonResponse::Error { message } => assert!(message.starts_with("Invalid request")),
            other => panic!("unexpected response: {:?}", other),
        }

        // The connection stays usable after a bad frame
        write_message(&mut stream, &DaemonRequest::Ping).await.unwrap();
        let body = read_frame(&mut stream).await.unwrap().unwrap();
        assert!(matches!(decode(&body).unwrap(), DaemonResponse::Pong));

        server_task.abort();
    }
}
