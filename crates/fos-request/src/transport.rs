//! Transport Capability
//!
//! The seam between the request builder and whatever performs the network
//! I/O. A transport behaves like an `XMLHttpRequest`: it is opened, receives
//! headers, sends once, and reports its lifecycle through events on a
//! download side and an upload side.

use std::sync::Arc;

use crate::data::RequestBody;
use crate::request::Method;
use crate::xhr::ResponseType;

/// Side of the exchange an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    /// Response direction (`xhr` itself)
    Download,
    /// Request body direction (`xhr.upload`)
    Upload,
}

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoadStart,
    Progress,
    Load,
    LoadEnd,
    Error,
    Abort,
}

impl EventKind {
    /// Every kind, in the order a transport may emit them
    pub const ALL: [EventKind; 6] = [
        EventKind::LoadStart,
        EventKind::Progress,
        EventKind::Load,
        EventKind::LoadEnd,
        EventKind::Error,
        EventKind::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoadStart => "loadstart",
            EventKind::Progress => "progress",
            EventKind::Load => "load",
            EventKind::LoadEnd => "loadend",
            EventKind::Error => "error",
            EventKind::Abort => "abort",
        }
    }

    /// Whether this kind ends the exchange on its side
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Load | EventKind::Error | EventKind::Abort)
    }
}

/// Progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub target: EventTarget,
    pub kind: EventKind,
    /// Is the total length computable?
    pub length_computable: bool,
    /// Bytes transferred so far
    pub loaded: u64,
    /// Total bytes (0 when unknown)
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(target: EventTarget, kind: EventKind, loaded: u64, total: Option<u64>) -> Self {
        Self {
            target,
            kind,
            length_computable: total.is_some(),
            loaded,
            total: total.unwrap_or(0),
        }
    }
}

/// Listener installed on a transport
pub type Listener = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Caller-supplied callback receiving every event of one direction
pub type EventCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Request transport
///
/// All methods take `&self`; implementations keep their state behind
/// interior mutability so the builder and the caller can share one handle.
/// Failures are never returned from these methods: they surface as an
/// [`EventKind::Error`] event after `send`.
pub trait Transport: Send + Sync + 'static {
    /// Register a listener for one event kind on one side
    fn add_event_listener(&self, target: EventTarget, kind: EventKind, listener: Listener);

    fn set_response_type(&self, response_type: ResponseType);

    fn set_with_credentials(&self, with_credentials: bool);

    /// Open the request
    fn open(&self, method: &Method, url: &str, asynchronous: bool);

    /// Set a request header
    fn set_request_header(&self, name: &str, value: &str);

    /// Start the exchange
    fn send(&self, body: Option<RequestBody>);

    /// Request cancellation; a no-op when nothing is in flight
    fn abort(&self);

    /// HTTP status code (0 before a response or after a failure)
    fn status(&self) -> u16;

    /// Status reason phrase, or the failure message after an error
    fn status_text(&self) -> String;
}

/// Creates one transport per send
pub trait TransportFactory {
    type Transport: Transport;

    fn create(&self) -> Arc<Self::Transport>;
}

impl<F: TransportFactory> TransportFactory for Arc<F> {
    type Transport = F::Transport;

    fn create(&self) -> Arc<Self::Transport> {
        (**self).create()
    }
}
