use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::commands::{ControlCommand, ControlResponse, SupervisorStatus};

/// Client side of the control socket; used by `lyra stop` and `lyra status`.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        match self.request(ControlCommand::Ping).await? {
            ControlResponse::Pong => Ok(()),
            other => bail!("unexpected ping response: {other:?}"),
        }
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        match self.request(ControlCommand::GetStatus).await? {
            ControlResponse::Status(status) => Ok(status),
            other => bail!("unexpected status response: {other:?}"),
        }
    }

    pub async fn shutdown(&self) -> Result<String> {
        match self.request(ControlCommand::Shutdown).await? {
            ControlResponse::Ack(message) => Ok(message),
            other => bail!("unexpected shutdown response: {other:?}"),
        }
    }

    async fn request(&self, command: ControlCommand) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let rendered = serde_json::to_string(&command)?;
        write_half.write_all(rendered.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            bail!("daemon closed the connection without responding");
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}
