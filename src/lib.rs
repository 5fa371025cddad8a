//! warmpool - a pool of warm worker processes behind an HTTP front end.
//!
//! A supervisor keeps a fixed number of worker slots filled with live
//! processes, forwards each HTTP request to exactly one idle worker over a
//! per-slot Unix socket, and recycles workers on request count, age, memory
//! or an explicit reload. A separate admin socket answers `status`, `reload`
//! and `stop`.

pub mod control;
pub mod error;
pub mod logging;
pub mod memory;
pub mod paths;
pub mod pidfile;
pub mod server;
pub mod settings;
pub mod supervisor;
pub mod version;
pub mod worker;

pub use error::{Result, WarmpoolError};
pub use settings::Settings;
