//! Control channel: the framed protocol spoken on worker and admin sockets.

pub mod client;
pub mod codec;
pub mod protocol;

pub use client::AdminClient;
pub use codec::{
    Frame, FrameError, MAX_BODY_BYTES, MAX_FRAME_BYTES, read_frame, write_encoded, write_frame, write_message,
};
pub use protocol::{
    Message, PoolSummary, RequestHead, ResponseHead, StatusFilter, StatusReport, WorkerRequest,
    WorkerResponse, WorkerStatus,
};
