//! Worker processes and the pool that manages them.
//!
//! Each slot runs one worker process at a time. The supervisor owns a
//! [`WorkerPool`]; every incarnation is driven by its own connection task
//! which speaks the control protocol over a per-slot Unix socket:
//!
//! ```text
//! worker ──REGISTER──▶ supervisor
//! worker ──READY─────▶ supervisor
//! worker ◀─DISPATCH─── supervisor   (one request at a time)
//! worker ──RESULT────▶ supervisor
//! worker ◀─STOP─────── supervisor   (drain, then exit)
//! ```

pub mod backoff;
pub(crate) mod conn;
pub mod handle;
pub mod pool;
pub mod proc;
pub mod signals;
pub mod spawn;
pub mod worker_main;

pub use backoff::BackoffPolicy;
pub use handle::{WorkerHandle, WorkerState};
pub use pool::{RecycleReason, StateCounts, WorkerPool};
pub use proc::{BoxFuture, OsProcess, WorkerProcess};
pub use signals::TerminationReason;
pub use spawn::{LaunchSpec, ProcessLauncher, WorkerLauncher};
pub use worker_main::run_worker_main;
