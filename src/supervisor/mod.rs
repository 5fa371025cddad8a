//! The supervisor: owns the worker pool and answers everyone who needs it.
//!
//! [`Supervisor::run`] is a single actor loop. The HTTP server, the admin
//! socket, the signal handler and the debug file watcher all talk to it
//! through a cloneable [`SupervisorHandle`].

pub mod admin;
pub mod command;
pub mod lifecycle;
pub mod runner;
pub mod watch;

pub use command::{DispatchError, Phase, SupervisorHandle};
pub use lifecycle::{run, run_with_launcher};
pub use runner::Supervisor;
pub use watch::ReloadWatcher;
