//! Built-in worker entry point.
//!
//! This module runs when `warmpool worker` is invoked, which is what the
//! supervisor launches when no `worker-executable` is configured. It answers
//! every request with a short plain-text page describing the worker that
//! served it, which is enough to watch routing, recycling and reloads happen.

use std::path::PathBuf;

use tokio::net::UnixStream;

use super::spawn::{ENV_APP_ENV, ENV_BOOTSTRAP, ENV_CONTROL_SOCKET, ENV_DEBUG, ENV_WORKER_ID};
use crate::control::{
    Frame, Message, RequestHead, ResponseHead, read_frame, write_frame, write_message,
};
use crate::error::{Result, WarmpoolError};

/// What the supervisor told this worker through the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub socket: PathBuf,
    pub id: usize,
    pub bootstrap: String,
    pub app_env: String,
    pub debug: bool,
}

impl WorkerEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let socket = lookup(ENV_CONTROL_SOCKET).ok_or_else(|| {
            WarmpoolError::Worker(format!(
                "{} is not set; workers are started by `warmpool start`",
                ENV_CONTROL_SOCKET
            ))
        })?;
        let id = match lookup(ENV_WORKER_ID) {
            Some(raw) => raw.parse().map_err(|_| {
                WarmpoolError::Worker(format!("{} is not a number: {}", ENV_WORKER_ID, raw))
            })?,
            None => 0,
        };
        Ok(Self {
            socket: PathBuf::from(socket),
            id,
            bootstrap: lookup(ENV_BOOTSTRAP).unwrap_or_else(|| "default".to_string()),
            app_env: lookup(ENV_APP_ENV).unwrap_or_else(|| "dev".to_string()),
            debug: lookup(ENV_DEBUG).is_some_and(|v| v == "1"),
        })
    }
}

/// Run the built-in worker until the supervisor stops it.
pub fn run_worker_main() -> Result<()> {
    let env = WorkerEnv::from_env()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(env))
}

async fn serve(env: WorkerEnv) -> Result<()> {
    let mut stream = UnixStream::connect(&env.socket).await?;
    let pid = std::process::id();

    write_message(&mut stream, Message::Register { pid }).await?;
    write_message(&mut stream, Message::Ready).await?;
    tracing::debug!(worker_id = env.id, pid, "Worker registered");

    let mut served: u64 = 0;
    loop {
        let Some(frame) = read_frame(&mut stream).await? else {
            // Supervisor went away
            return Ok(());
        };

        match frame.message {
            Message::Dispatch { request } => {
                served += 1;
                let (response, body) = respond(&env, pid, served, &request, &frame.body);
                write_frame(
                    &mut stream,
                    &Frame::with_body(Message::Result { response }, body),
                )
                .await?;
            }
            Message::Stop { .. } => {
                tracing::debug!(worker_id = env.id, served, "Worker stopping");
                return Ok(());
            }
            other => {
                tracing::warn!(kind = other.kind(), "Ignoring unexpected message");
            }
        }
    }
}

fn respond(
    env: &WorkerEnv,
    pid: u32,
    served: u64,
    request: &RequestHead,
    body: &[u8],
) -> (ResponseHead, Vec<u8>) {
    let mut text = format!(
        "warmpool worker {} (pid {})\nbootstrap: {}\nenvironment: {}\nrequest: {} {}\nserved: {}\n",
        env.id, pid, env.bootstrap, env.app_env, request.method, request.uri, served
    );
    if !body.is_empty() {
        text.push_str(&format!("body: {} bytes\n", body.len()));
    }
    if env.debug {
        for (name, value) in &request.headers {
            text.push_str(&format!("{}: {}\n", name, value));
        }
    }

    let head = ResponseHead::new(200)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_header("x-warmpool-worker", env.id.to_string());
    (head, text.into_bytes())
}
