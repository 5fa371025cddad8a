//! Client side of the administrative socket.
//!
//! Each call opens a connection, sends one request frame, reads one reply
//! frame and closes. Used by `warmpool status`, `reload` and `stop`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;

use super::codec::{read_frame, write_message};
use super::protocol::{Message, StatusFilter, StatusReport};
use crate::error::{Result, WarmpoolError};
use crate::paths;

/// Default time to wait for the supervisor's reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to a running supervisor through its controller socket.
#[derive(Debug, Clone)]
pub struct AdminClient {
    socket: PathBuf,
    timeout: Duration,
}

impl AdminClient {
    /// Client for the supervisor whose socket directory is `socket_dir`.
    pub fn new(socket_dir: impl AsRef<Path>) -> Self {
        Self {
            socket: paths::controller_socket(socket_dir),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub async fn status(&self, filter: Option<StatusFilter>) -> Result<StatusReport> {
        match self.request(Message::StatusRequest { filter }).await? {
            Message::StatusReply(report) => Ok(report),
            other => Err(unexpected("STATUS_REQUEST", &other)),
        }
    }

    /// Ask for a rolling reload. Returns once the supervisor has accepted it,
    /// not when every slot has been cycled.
    pub async fn reload(&self) -> Result<()> {
        self.expect_accepted(Message::ReloadRequest).await
    }

    /// Ask the supervisor to drain and exit. Returns on acknowledgement.
    pub async fn stop(&self) -> Result<()> {
        self.expect_accepted(Message::StopRequest).await
    }

    async fn expect_accepted(&self, message: Message) -> Result<()> {
        let kind = message.kind();
        match self.request(message).await? {
            Message::Accepted { .. } => Ok(()),
            other => Err(unexpected(kind, &other)),
        }
    }

    async fn request(&self, message: Message) -> Result<Message> {
        let reply = tokio::time::timeout(self.timeout, self.exchange(message))
            .await
            .map_err(|_| WarmpoolError::Timeout("supervisor reply".into()))??;

        match reply {
            Message::Rejected { reason } => Err(WarmpoolError::Rejected(reason)),
            other => Ok(other),
        }
    }

    async fn exchange(&self, message: Message) -> Result<Message> {
        let mut stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|_| WarmpoolError::NotRunning(self.socket.clone()))?;
        write_message(&mut stream, message).await?;
        match read_frame(&mut stream).await? {
            Some(frame) => Ok(frame.message),
            None => Err(WarmpoolError::Protocol(
                "supervisor closed the connection without replying".into(),
            )),
        }
    }
}

fn unexpected(request: &str, reply: &Message) -> WarmpoolError {
    WarmpoolError::Protocol(format!(
        "unexpected {} reply to {}",
        reply.kind(),
        request
    ))
}
