use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lyra_config::AppConfig;

use crate::commands::{ControlCommand, ControlResponse};
use crate::supervisor::{ReplyEvent, Supervisor};

/// Run the whole system in the foreground: supervisor, worker pool, reply
/// drain, and the Unix-socket control surface.  Returns after a `Shutdown`
/// command or Ctrl-C completes the drain.
pub async fn run_daemon(config: AppConfig) -> Result<()> {
    let socket_path = config.daemon.socket_path.clone();
    if Path::new(&socket_path).exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    let supervisor = Supervisor::new(config).await?;
    let Some(mut replies) = supervisor.start().await else {
        anyhow::bail!("supervisor already started");
    };

    // Egress is an external collaborator; the daemon logs terminal events so
    // an adapter can be attached over this channel instead.
    let reply_drain = tokio::spawn(async move {
        while let Some(event) = replies.recv().await {
            match event {
                ReplyEvent::Reply {
                    queue_id,
                    user_id,
                    metadata,
                    ..
                } => {
                    info!(
                        %queue_id,
                        user = %user_id,
                        degraded = metadata.degraded,
                        personalization = metadata.personalization,
                        "reply delivered"
                    );
                }
                ReplyEvent::Failure {
                    queue_id,
                    user_id,
                    error,
                    ..
                } => {
                    warn!(%queue_id, user = %user_id, %error, "dispatch failed");
                }
            }
        }
    });

    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path, "control socket listening");

    let stop = CancellationToken::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let supervisor = supervisor.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, supervisor, stop).await {
                        error!(%err, "control connection failed");
                    }
                });
            }
            _ = stop.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
        }
    }

    supervisor.shutdown().await;
    reply_drain.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    supervisor: Arc<Supervisor>,
    stop: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command: ControlCommand = match serde_json::from_str(trimmed) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "bad control command");
                continue;
            }
        };

        let response = match command {
            ControlCommand::Ping => ControlResponse::Pong,
            ControlCommand::GetStatus => ControlResponse::Status(supervisor.status().await),
            ControlCommand::Shutdown => {
                stop.cancel();
                ControlResponse::Ack("draining".to_string())
            }
        };

        let rendered = serde_json::to_string(&response)?;
        write_half.write_all(rendered.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        if matches!(response, ControlResponse::Ack(_)) {
            return Ok(());
        }
    }
}
