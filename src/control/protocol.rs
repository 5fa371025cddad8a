//! Messages exchanged over the worker and administrative sockets.
//!
//! Every frame carries one JSON-encoded [`Message`] tagged by `type`. DISPATCH
//! and RESULT additionally carry the raw HTTP body in the frame's body
//! section, see [`super::codec`].

use serde::{Deserialize, Serialize};

use crate::supervisor::Phase;
use crate::worker::WorkerState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Worker to supervisor: a new incarnation is starting.
    Register { pid: u32 },

    /// Worker to supervisor: able to accept a request.
    Ready,

    /// Supervisor to worker: handle this request. Body follows in the frame.
    Dispatch { request: RequestHead },

    /// Worker to supervisor: the response to the last DISPATCH. Body follows.
    Result { response: ResponseHead },

    /// Supervisor to worker: exit after finishing in-flight work.
    Stop { graceful: bool },

    /// Admin client: report slot states.
    StatusRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<StatusFilter>,
    },

    StatusReply(StatusReport),

    /// Admin client: cycle every slot to a fresh incarnation.
    ReloadRequest,

    /// Admin client: drain and exit.
    StopRequest,

    /// Supervisor acknowledgement of RELOAD_REQUEST or STOP_REQUEST.
    Accepted { action: String },

    /// Supervisor refusal of a malformed or unsupported admin request.
    Rejected { reason: String },
}

impl Message {
    /// Wire name of this message kind, for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::Ready => "READY",
            Self::Dispatch { .. } => "DISPATCH",
            Self::Result { .. } => "RESULT",
            Self::Stop { .. } => "STOP",
            Self::StatusRequest { .. } => "STATUS_REQUEST",
            Self::StatusReply(_) => "STATUS_REPLY",
            Self::ReloadRequest => "RELOAD_REQUEST",
            Self::StopRequest => "STOP_REQUEST",
            Self::Accepted { .. } => "ACCEPTED",
            Self::Rejected { .. } => "REJECTED",
        }
    }
}

/// HTTP request metadata forwarded to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHead {
    pub method: String,
    /// Path and query as received.
    pub uri: String,
    pub version: String,
    /// Header pairs in arrival order; repeated names stay repeated.
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

impl RequestHead {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            remote_addr: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path component of the URI, without the query string.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }
}

/// HTTP response metadata returned by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHead {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A request on its way to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub head: RequestHead,
    pub body: Vec<u8>,
}

impl WorkerRequest {
    pub fn new(head: RequestHead, body: Vec<u8>) -> Self {
        Self { head, body }
    }

    /// Bodiless GET, mostly for tests and probes.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(RequestHead::new("GET", uri), Vec::new())
    }
}

/// A worker's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    pub head: ResponseHead,
    pub body: Vec<u8>,
}

/// One slot in a STATUS_REPLY. Field names are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub id: usize,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub requests_served: u64,
    pub age_seconds: u64,
}

/// Pool-wide counters in a STATUS_REPLY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub phase: Phase,
    pub total: usize,
    pub spawning: usize,
    pub ready: usize,
    pub busy: usize,
    pub draining: usize,
    pub terminated: usize,
    /// Requests waiting for a free worker.
    pub queued: usize,
    /// Whether a rolling reload is in progress.
    pub reloading: bool,
    pub total_requests: u64,
    pub total_restarts: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerStatus>,
    pub summary: PoolSummary,
}

/// Narrows the `workers` list of a STATUS_REPLY. The summary is never filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<usize>,
}

impl StatusFilter {
    pub fn matches(&self, worker: &WorkerStatus) -> bool {
        self.state.is_none_or(|s| s == worker.state) && self.id.is_none_or(|id| id == worker.id)
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.id.is_none()
    }
}
