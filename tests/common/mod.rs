//! In-process fake workers for supervisor tests.
//!
//! `FakeLauncher` plugs into the `WorkerLauncher` seam. Each "process" is a
//! tokio task that connects to the slot socket and speaks the worker side of
//! the control protocol, behaving as scripted per slot.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warmpool::Settings;
use warmpool::control::{Frame, Message, ResponseHead, WorkerResponse, read_frame, write_frame, write_message};
use warmpool::supervisor::{Supervisor, SupervisorHandle};
use warmpool::worker::{BoxFuture, LaunchSpec, TerminationReason, WorkerLauncher, WorkerProcess};

/// Fake pids start far above anything the kernel hands out.
pub const FIRST_FAKE_PID: u32 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Answer every request with 200, echoing the body.
    Echo,
    /// Accept requests but never answer.
    Hang,
    /// Exit with status 1 on the first request.
    Crash,
    /// Register but never send READY.
    NeverReady,
}

pub struct FakeLauncher {
    default: Behaviour,
    script: Mutex<HashMap<usize, VecDeque<Behaviour>>>,
    next_pid: AtomicU32,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Self::with_default(Behaviour::Echo)
    }

    pub fn with_default(default: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            default,
            script: Mutex::new(HashMap::new()),
            next_pid: AtomicU32::new(FIRST_FAKE_PID),
            launches: AtomicUsize::new(0),
        })
    }

    /// Behaviours for the next incarnations of `slot`, in order.
    pub fn script(&self, slot: usize, behaviours: &[Behaviour]) {
        self.script
            .lock()
            .unwrap()
            .entry(slot)
            .or_default()
            .extend(behaviours.iter().copied());
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> warmpool::Result<Box<dyn WorkerProcess>> {
        let behaviour = self
            .script
            .lock()
            .unwrap()
            .get_mut(&spec.id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(self.default);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.launches.fetch_add(1, Ordering::SeqCst);

        let exit = Arc::new(watch::channel(None).0);
        let task = tokio::spawn(fake_worker(
            spec.clone(),
            pid,
            behaviour,
            Arc::clone(&exit),
        ));
        Ok(Box::new(FakeProcess {
            pid,
            exit,
            task,
        }))
    }
}

type ExitSlot = Arc<watch::Sender<Option<TerminationReason>>>;

fn record_exit(exit: &ExitSlot, reason: TerminationReason) {
    exit.send_if_modified(|slot| {
        if slot.is_none() {
            *slot = Some(reason);
            true
        } else {
            false
        }
    });
}

struct FakeProcess {
    pid: u32,
    exit: ExitSlot,
    task: JoinHandle<()>,
}

impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn wait(&mut self) -> BoxFuture<'_, TerminationReason> {
        let mut rx = self.exit.subscribe();
        Box::pin(async move {
            match rx.wait_for(|reason| reason.is_some()).await {
                Ok(reason) => reason.as_ref().cloned().unwrap_or(TerminationReason::Unknown),
                Err(_) => TerminationReason::Unknown,
            }
        })
    }

    fn terminate(&mut self) {
        self.task.abort();
        record_exit(&self.exit, TerminationReason::Signaled(Signal::SIGTERM));
    }

    fn kill(&mut self) -> BoxFuture<'_, TerminationReason> {
        self.task.abort();
        record_exit(&self.exit, TerminationReason::ForceKilled);
        self.wait()
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn fake_worker(spec: LaunchSpec, pid: u32, behaviour: Behaviour, exit: ExitSlot) {
    let reason = speak_protocol(&spec, pid, behaviour).await;
    record_exit(&exit, reason);
}

async fn speak_protocol(spec: &LaunchSpec, pid: u32, behaviour: Behaviour) -> TerminationReason {
    let Ok(mut stream) = UnixStream::connect(&spec.socket).await else {
        return TerminationReason::Exited(1);
    };
    if write_message(&mut stream, Message::Register { pid }).await.is_err() {
        return TerminationReason::Exited(1);
    }
    if behaviour == Behaviour::NeverReady {
        std::future::pending::<()>().await;
    }
    if write_message(&mut stream, Message::Ready).await.is_err() {
        return TerminationReason::Exited(1);
    }

    loop {
        match read_frame(&mut stream).await {
            Ok(Some(Frame {
                message: Message::Dispatch { .. },
                body,
            })) => match behaviour {
                Behaviour::Echo | Behaviour::NeverReady => {
                    let response = ResponseHead::new(200)
                        .with_header("x-slot", spec.id.to_string())
                        .with_header("x-pid", pid.to_string());
                    let frame = Frame::with_body(Message::Result { response }, body);
                    if write_frame(&mut stream, &frame).await.is_err() {
                        return TerminationReason::Exited(1);
                    }
                }
                Behaviour::Hang => {}
                Behaviour::Crash => return TerminationReason::Exited(1),
            },
            Ok(Some(Frame {
                message: Message::Stop { .. },
                ..
            })) => return TerminationReason::Exited(0),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return TerminationReason::Exited(0),
        }
    }
}

/// Settings for a fast test pool with its runtime files under `dir`.
pub fn test_settings(dir: &Path, workers: usize) -> Settings {
    Settings {
        workers,
        port: 0,
        logging: false,
        socket_path: dir.to_path_buf(),
        pidfile: dir.join("warmpool.pid"),
        startup_timeout: 5,
        reload_timeout: 5,
        queue_timeout_ms: 5000,
        ..Settings::default()
    }
}

/// Start a supervisor and wait until every worker is ready.
pub async fn start(
    settings: Settings,
    launcher: Arc<FakeLauncher>,
) -> (SupervisorHandle, JoinHandle<warmpool::Result<()>>) {
    let (supervisor, handle) = Supervisor::new(Arc::new(settings), launcher);
    let task = tokio::spawn(supervisor.run());
    tokio::time::timeout(Duration::from_secs(10), handle.wait_until_running())
        .await
        .expect("pool did not start in time")
        .expect("pool failed to start");
    (handle, task)
}

/// Poll `check` every 10ms until it returns true or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn header<'a>(response: &'a WorkerResponse, name: &str) -> Option<&'a str> {
    response
        .head
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn served_by(response: &WorkerResponse) -> usize {
    header(response, "x-slot")
        .and_then(|s| s.parse().ok())
        .expect("response without x-slot")
}
