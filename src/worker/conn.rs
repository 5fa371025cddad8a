//! The connection task behind one worker incarnation.
//!
//! Each incarnation gets its own task. It binds the slot socket, launches the
//! process, runs the REGISTER/READY handshake and then forwards dispatches one
//! at a time. The pool talks to it through a [`WorkerLink`] and hears back
//! through [`PoolEvent`]s; it never blocks on the worker itself.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::Instrument;

use super::proc::{self, WorkerProcess};
use super::signals::TerminationReason;
use super::spawn::{LaunchSpec, WorkerLauncher};
use crate::control::{
    Frame, FrameError, Message, WorkerRequest, WorkerResponse, read_frame, write_encoded,
    write_message,
};
use crate::supervisor::DispatchError;

/// How long a worker that hung up gets to exit on its own.
const HANGUP_GRACE: Duration = Duration::from_millis(500);

pub(crate) type DispatchReply = oneshot::Sender<Result<WorkerResponse, DispatchError>>;

/// Command channel into a connection task.
pub(crate) type WorkerLink = mpsc::UnboundedSender<WorkerCommand>;

#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Dispatch {
        request: WorkerRequest,
        reply: DispatchReply,
    },
    /// Send STOP and wait for exit until `deadline`, then kill.
    Stop { deadline: Instant },
    Kill,
}

/// What connection tasks report back to the pool.
#[derive(Debug)]
pub(crate) enum PoolEvent {
    Ready {
        id: usize,
        incarnation: u64,
        pid: u32,
    },
    /// A dispatch was answered; the worker is free again.
    Completed { id: usize, incarnation: u64 },
    /// A dispatch was refused before reaching the worker.
    Released { id: usize, incarnation: u64 },
    /// The incarnation never became ready.
    SpawnFailed {
        id: usize,
        incarnation: u64,
        reason: String,
    },
    Exited {
        id: usize,
        incarnation: u64,
        reason: TerminationReason,
    },
}

/// Everything one connection task needs.
pub(crate) struct Incarnation {
    pub spec: LaunchSpec,
    pub incarnation: u64,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub startup_timeout: Duration,
    pub max_execution_time: Option<Duration>,
    pub commands: mpsc::UnboundedReceiver<WorkerCommand>,
    pub events: mpsc::UnboundedSender<PoolEvent>,
}

enum StartupError {
    Failed(String),
    /// The pool gave up on this incarnation before it was ready.
    Cancelled,
}

/// An established control connection.
struct Connection {
    writer: OwnedWriteHalf,
    frames: mpsc::Receiver<Result<Frame, FrameError>>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

struct InFlight {
    reply: DispatchReply,
    deadline: Option<Instant>,
}

pub(crate) fn spawn(incarnation: Incarnation) -> JoinHandle<()> {
    let span = tracing::info_span!(
        "worker",
        worker_id = incarnation.spec.id,
        incarnation = incarnation.incarnation
    );
    tokio::spawn(run(incarnation).instrument(span))
}

async fn run(mut inc: Incarnation) {
    let socket = inc.spec.socket.clone();
    let _ = std::fs::remove_file(&socket);

    let listener = match UnixListener::bind(&socket) {
        Ok(listener) => listener,
        Err(e) => {
            inc.spawn_failed(format!("cannot bind {}: {}", socket.display(), e));
            return;
        }
    };

    let mut process = match inc.launcher.launch(&inc.spec) {
        Ok(process) => process,
        Err(e) => {
            remove_socket(&socket);
            inc.spawn_failed(e.to_string());
            return;
        }
    };

    let handshake = startup(&mut inc, &listener, process.as_mut()).await;
    drop(listener);
    remove_socket(&socket);

    let (mut conn, pid) = match handshake {
        Ok(established) => established,
        Err(StartupError::Failed(reason)) => {
            tracing::warn!(reason = %reason, "Worker failed to start");
            process.kill().await;
            inc.spawn_failed(reason);
            return;
        }
        Err(StartupError::Cancelled) => {
            let reason = process.kill().await;
            inc.exited(reason);
            return;
        }
    };

    tracing::debug!(pid, "Worker handshake complete");
    let _ = inc.events.send(PoolEvent::Ready {
        id: inc.spec.id,
        incarnation: inc.incarnation,
        pid,
    });

    let reason = serve(&mut inc, &mut conn, process.as_mut()).await;
    inc.exited(reason);
}

/// Accept the worker's connection and wait for REGISTER then READY.
async fn startup(
    inc: &mut Incarnation,
    listener: &UnixListener,
    process: &mut dyn WorkerProcess,
) -> Result<(Connection, u32), StartupError> {
    let deadline = Instant::now() + inc.startup_timeout;

    let stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, _)) => stream,
            Err(e) => return Err(StartupError::Failed(format!("accept failed: {}", e))),
        },
        reason = process.wait() => {
            return Err(StartupError::Failed(format!("{} before connecting", reason)));
        }
        _ = inc.commands.recv() => return Err(StartupError::Cancelled),
        _ = sleep_until(deadline) => {
            return Err(StartupError::Failed("did not connect within startup-timeout".into()));
        }
    };

    let (read_half, writer) = stream.into_split();
    let (tx, frames) = mpsc::channel(8);
    let mut conn = Connection {
        writer,
        frames,
        reader: tokio::spawn(forward_frames(read_half, tx)),
    };

    let mut registered = None;
    loop {
        tokio::select! {
            frame = conn.frames.recv() => match frame {
                Some(Ok(Frame { message: Message::Register { pid }, .. })) => {
                    registered = Some(pid);
                }
                Some(Ok(Frame { message: Message::Ready, .. })) => {
                    return match registered {
                        Some(pid) => Ok((conn, pid)),
                        None => Err(StartupError::Failed("READY before REGISTER".into())),
                    };
                }
                Some(Ok(frame)) => {
                    return Err(StartupError::Failed(format!(
                        "unexpected {} during startup",
                        frame.message.kind()
                    )));
                }
                Some(Err(e)) => return Err(StartupError::Failed(e.to_string())),
                None => {
                    return Err(StartupError::Failed("connection closed during startup".into()));
                }
            },
            reason = process.wait() => {
                return Err(StartupError::Failed(format!("{} during startup", reason)));
            }
            _ = inc.commands.recv() => return Err(StartupError::Cancelled),
            _ = sleep_until(deadline) => {
                return Err(StartupError::Failed("not ready within startup-timeout".into()));
            }
        }
    }
}

fn unforwardable(err: FrameError) -> DispatchError {
    match err {
        FrameError::TooLarge { len, max } => DispatchError::RequestTooLarge { len, max },
        other => DispatchError::Unencodable(other.to_string()),
    }
}

/// Forward dispatches until the incarnation ends; returns why it ended.
async fn serve(
    inc: &mut Incarnation,
    conn: &mut Connection,
    process: &mut dyn WorkerProcess,
) -> TerminationReason {
    let mut in_flight: Option<InFlight> = None;

    let reason = loop {
        let deadline = in_flight.as_ref().and_then(|f| f.deadline);

        tokio::select! {
            command = inc.commands.recv() => match command {
                Some(WorkerCommand::Dispatch { request, reply }) => {
                    if in_flight.is_some() {
                        let _ = reply.send(Err(DispatchError::Unavailable));
                        continue;
                    }
                    let frame = Frame::with_body(
                        Message::Dispatch { request: request.head },
                        request.body,
                    );
                    let encoded = match frame.encode() {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            tracing::warn!(error = %e, "Request cannot be sent to a worker");
                            let _ = reply.send(Err(unforwardable(e)));
                            let _ = inc.events.send(PoolEvent::Released {
                                id: inc.spec.id,
                                incarnation: inc.incarnation,
                            });
                            continue;
                        }
                    };
                    if let Err(e) = write_encoded(&mut conn.writer, &encoded).await {
                        tracing::warn!(error = %e, "Failed to send request to worker");
                        in_flight = Some(InFlight { reply, deadline: None });
                        process.kill().await;
                        break TerminationReason::ConnectionLost;
                    }
                    in_flight = Some(InFlight {
                        reply,
                        deadline: inc.max_execution_time.map(|limit| Instant::now() + limit),
                    });
                }
                Some(WorkerCommand::Stop { deadline }) => {
                    let _ = write_message(&mut conn.writer, Message::Stop { graceful: true }).await;
                    break proc::stop_by(process, deadline).await;
                }
                Some(WorkerCommand::Kill) | None => {
                    break process.kill().await;
                }
            },
            frame = conn.frames.recv() => match frame {
                Some(Ok(Frame { message: Message::Result { response }, body })) => {
                    let Some(done) = in_flight.take() else {
                        tracing::warn!("Worker sent RESULT without a request");
                        process.kill().await;
                        break TerminationReason::ProtocolError("unsolicited RESULT".into());
                    };
                    let _ = done.reply.send(Ok(WorkerResponse { head: response, body }));
                    let _ = inc.events.send(PoolEvent::Completed {
                        id: inc.spec.id,
                        incarnation: inc.incarnation,
                    });
                }
                Some(Ok(Frame { message: Message::Ready, .. })) => {}
                Some(Ok(frame)) => {
                    let kind = frame.message.kind();
                    tracing::warn!(kind, "Unexpected message from worker");
                    process.kill().await;
                    break TerminationReason::ProtocolError(format!("unexpected {}", kind));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Unreadable frame from worker");
                    process.kill().await;
                    break TerminationReason::ProtocolError(e.to_string());
                }
                None => {
                    break match tokio::time::timeout(HANGUP_GRACE, process.wait()).await {
                        Ok(reason) => reason,
                        Err(_) => {
                            process.kill().await;
                            TerminationReason::ConnectionLost
                        }
                    };
                }
            },
            reason = process.wait() => break reason,
            _ = sleep_or_pending(deadline) => {
                let limit = inc.max_execution_time.unwrap_or_default();
                tracing::warn!(limit_secs = limit.as_secs(), "Request exceeded max-execution-time");
                if let Some(expired) = in_flight.take() {
                    let _ = expired.reply.send(Err(DispatchError::Timeout {
                        slot: inc.spec.id,
                        after: limit,
                    }));
                }
                process.kill().await;
                break TerminationReason::ExecutionTimeout;
            }
        }
    };

    if let Some(abandoned) = in_flight.take() {
        let _ = abandoned.reply.send(Err(DispatchError::WorkerCrashed {
            slot: inc.spec.id,
            reason: reason.to_string(),
        }));
    }
    reason
}

/// Move frames off the socket so the select loop above stays cancel-safe.
async fn forward_frames(mut reader: OwnedReadHalf, tx: mpsc::Sender<Result<Frame, FrameError>>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Sleep until `deadline`, or forever without one.
pub(crate) async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "Failed to remove worker socket");
    }
}

impl Incarnation {
    fn spawn_failed(&self, reason: String) {
        let _ = self.events.send(PoolEvent::SpawnFailed {
            id: self.spec.id,
            incarnation: self.incarnation,
            reason,
        });
    }

    fn exited(&self, reason: TerminationReason) {
        let _ = self.events.send(PoolEvent::Exited {
            id: self.spec.id,
            incarnation: self.incarnation,
            reason,
        });
    }
}
