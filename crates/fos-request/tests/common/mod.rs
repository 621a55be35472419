//! Shared test helpers: a scripted in-memory transport

#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex};

use fos_request::{
    EventKind, EventTarget, Listener, Method, ProgressEvent, RequestBody, ResponseType, Transport,
    TransportFactory,
};

#[derive(Default)]
pub struct MockState {
    pub method: Option<Method>,
    pub url: Option<String>,
    pub asynchronous: Option<bool>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub sent: bool,
    pub finished: bool,
    pub aborted: bool,
    pub response_type: Option<ResponseType>,
    pub with_credentials: Option<bool>,
    pub status: u16,
    pub status_text: String,
}

/// Transport that records every call and settles only when a test tells it to
#[derive(Default)]
pub struct MockTransport {
    pub state: Mutex<MockState>,
    listeners: Mutex<Vec<(EventTarget, EventKind, Arc<Listener>)>>,
}

impl MockTransport {
    pub fn emit(&self, target: EventTarget, kind: EventKind) {
        let event = ProgressEvent::new(target, kind, 0, None);
        let listeners: Vec<_> = self.listeners.lock().unwrap().iter()
            .filter(|(t, k, _)| *t == target && *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            (**listener)(&event);
        }
    }

    /// Finish with an HTTP response
    pub fn complete(&self, status: u16, status_text: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = status;
            state.status_text = status_text.to_string();
            state.finished = true;
        }
        self.emit(EventTarget::Download, EventKind::Load);
        self.emit(EventTarget::Download, EventKind::LoadEnd);
    }

    /// Finish with a network failure
    pub fn fail(&self, status_text: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = 0;
            state.status_text = status_text.to_string();
            state.finished = true;
        }
        self.emit(EventTarget::Download, EventKind::Error);
        self.emit(EventTarget::Download, EventKind::LoadEnd);
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone().unwrap_or_default()
    }

    pub fn method(&self) -> Option<Method> {
        self.state.lock().unwrap().method.clone()
    }

    pub fn body(&self) -> Option<RequestBody> {
        self.state.lock().unwrap().body.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn was_aborted(&self) -> bool {
        self.state.lock().unwrap().aborted
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("MockTransport")
            .field("method", &state.method)
            .field("url", &state.url)
            .field("status", &state.status)
            .finish_non_exhaustive()
    }
}

impl Transport for MockTransport {
    fn add_event_listener(&self, target: EventTarget, kind: EventKind, listener: Listener) {
        self.listeners.lock().unwrap().push((target, kind, Arc::new(listener)));
    }

    fn set_response_type(&self, response_type: ResponseType) {
        self.state.lock().unwrap().response_type = Some(response_type);
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        self.state.lock().unwrap().with_credentials = Some(with_credentials);
    }

    fn open(&self, method: &Method, url: &str, asynchronous: bool) {
        let mut state = self.state.lock().unwrap();
        state.method = Some(method.clone());
        state.url = Some(url.to_string());
        state.asynchronous = Some(asynchronous);
    }

    fn set_request_header(&self, name: &str, value: &str) {
        self.state.lock().unwrap().headers.push((name.to_string(), value.to_string()));
    }

    fn send(&self, body: Option<RequestBody>) {
        let mut state = self.state.lock().unwrap();
        state.body = body;
        state.sent = true;
    }

    fn abort(&self) {
        let in_flight = {
            let mut state = self.state.lock().unwrap();
            if !state.sent || state.finished {
                false
            } else {
                state.aborted = true;
                state.finished = true;
                true
            }
        };
        if in_flight {
            self.emit(EventTarget::Download, EventKind::Abort);
            self.emit(EventTarget::Download, EventKind::LoadEnd);
        }
    }

    fn status(&self) -> u16 {
        self.state.lock().unwrap().status
    }

    fn status_text(&self) -> String {
        self.state.lock().unwrap().status_text.clone()
    }
}

/// Hands out fresh mock transports and keeps every one it created
#[derive(Default, Clone)]
pub struct MockFactory {
    created: Arc<Mutex<Vec<Arc<MockTransport>>>>,
}

impl MockFactory {
    pub fn last(&self) -> Arc<MockTransport> {
        self.created.lock().unwrap().last().cloned().expect("no transport created")
    }

    pub fn get(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(&self) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::default());
        self.created.lock().unwrap().push(Arc::clone(&transport));
        transport
    }
}

/// Recorded events, for callbacks
pub type EventLog = Arc<Mutex<Vec<(EventTarget, EventKind)>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorder(log: &EventLog) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |event: &ProgressEvent| log.lock().unwrap().push((event.target, event.kind))
}
