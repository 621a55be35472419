//! XMLHttpRequest
//!
//! Default transport: an `XMLHttpRequest` work-alike speaking HTTP/1.1 over
//! plain TCP. The exchange runs on a spawned smol task and reports back
//! through download and upload events.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use smol::channel::{self, Receiver, Sender};
use smol::io::BufReader;
use smol::net::TcpStream;
use smol::Task;
use url::{Host, Position, Url};

use crate::data::RequestBody;
use crate::http1::{Http1Parser, Http1Request, Http1Response};
use crate::lock;
use crate::request::Method;
use crate::transport::{EventKind, EventTarget, Listener, ProgressEvent, Transport, TransportFactory};

/// XMLHttpRequest ready states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReadyState {
    /// Client has been created, open() not called yet
    #[default]
    Unsent = 0,
    /// open() has been called
    Opened = 1,
    /// send() has been called, headers received
    HeadersReceived = 2,
    /// Downloading, the response holds partial data
    Loading = 3,
    /// Operation complete
    Done = 4,
}

/// Response types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Text,
    ArrayBuffer,
    Blob,
    Document,
    Json,
}

impl ResponseType {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "arraybuffer" => ResponseType::ArrayBuffer,
            "blob" => ResponseType::Blob,
            "document" => ResponseType::Document,
            "json" => ResponseType::Json,
            _ => ResponseType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Text => "",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Blob => "blob",
            ResponseType::Document => "document",
            ResponseType::Json => "json",
        }
    }
}

/// Response variants, shaped by [`ResponseType`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrResponse {
    Empty,
    Text(String),
    ArrayBuffer(Vec<u8>),
    Blob(Vec<u8>),
    Json(String),
    Document(String),
}

/// XHR errors
#[derive(Debug, thiserror::Error)]
pub enum XhrError {
    #[error("Invalid state")]
    InvalidState,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Response exceeds {0} bytes")]
    TooLarge(usize),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct XhrConfig {
    /// User agent string
    pub user_agent: String,
    /// Base for relative request URLs
    pub base_url: Option<Url>,
    /// Headers sent unless the request sets them itself
    pub default_headers: Vec<(String, String)>,
    /// Largest accepted response body
    pub max_response_bytes: usize,
}

impl Default for XhrConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("fOS-Request/", env!("CARGO_PKG_VERSION")).into(),
            base_url: None,
            default_headers: Vec::new(),
            max_response_bytes: 64 * 1024 * 1024,
        }
    }
}

/// XhrFactory builder
#[derive(Debug, Default)]
pub struct XhrFactoryBuilder {
    config: XhrConfig,
}

impl XhrFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: &str) -> Self {
        self.config.user_agent = ua.to_string();
        self
    }

    pub fn base_url(mut self, base: Url) -> Self {
        self.config.base_url = Some(base);
        self
    }

    pub fn default_header(mut self, name: &str, value: &str) -> Self {
        self.config.default_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn max_response_bytes(mut self, max: usize) -> Self {
        self.config.max_response_bytes = max;
        self
    }

    pub fn build(self) -> XhrFactory {
        XhrFactory::with_config(self.config)
    }
}

/// Creates [`XmlHttpRequest`] transports sharing one configuration
#[derive(Debug, Clone, Default)]
pub struct XhrFactory {
    config: Arc<XhrConfig>,
}

impl XhrFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> XhrFactoryBuilder {
        XhrFactoryBuilder::new()
    }

    pub fn with_config(config: XhrConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    pub fn config(&self) -> &XhrConfig {
        &self.config
    }
}

impl TransportFactory for XhrFactory {
    type Transport = XmlHttpRequest;

    fn create(&self) -> Arc<XmlHttpRequest> {
        Arc::new(XmlHttpRequest::with_config(Arc::clone(&self.config)))
    }
}

/// XMLHttpRequest object
pub struct XmlHttpRequest {
    inner: Arc<XhrInner>,
    // Dropping the handle cancels an exchange still in flight
    task: Mutex<Option<Task<()>>>,
}

struct XhrInner {
    config: Arc<XhrConfig>,
    state: Mutex<XhrState>,
    listeners: Mutex<Vec<(EventTarget, EventKind, Arc<Listener>)>>,
    abort_tx: Sender<()>,
    abort_rx: Receiver<()>,
}

#[derive(Default)]
struct XhrState {
    ready_state: ReadyState,
    status: u16,
    status_text: String,
    response_headers: Vec<(String, String)>,
    response_bytes: Vec<u8>,
    response_type: ResponseType,
    with_credentials: bool,

    method: Method,
    url: Option<Url>,
    request_headers: Vec<(String, String)>,
    // Failure found by open()/set_request_header(), reported at send()
    error: Option<XhrError>,
    send_flag: bool,
    upload_complete: bool,
}

impl XhrState {
    fn clear_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response_headers.clear();
        self.response_bytes.clear();
    }
}

/// Request ready to go on the wire
struct Prepared {
    url: Url,
    request: Http1Request,
    expect_body: bool,
    upload_len: Option<u64>,
}

enum Outcome {
    Complete(Http1Response),
    Failed(XhrError),
    Aborted,
}

impl Default for XmlHttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlHttpRequest {
    /// Create a new XMLHttpRequest
    pub fn new() -> Self {
        Self::with_config(Arc::new(XhrConfig::default()))
    }

    pub fn with_config(config: Arc<XhrConfig>) -> Self {
        let (abort_tx, abort_rx) = channel::bounded(1);
        Self {
            inner: Arc::new(XhrInner {
                config,
                state: Mutex::new(XhrState::default()),
                listeners: Mutex::new(Vec::new()),
                abort_tx,
                abort_rx,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        lock(&self.inner.state).ready_state
    }

    pub fn response_type(&self) -> ResponseType {
        lock(&self.inner.state).response_type
    }

    pub fn with_credentials(&self) -> bool {
        lock(&self.inner.state).with_credentials
    }

    /// Resolved request URL, once opened successfully
    pub fn url(&self) -> Option<Url> {
        lock(&self.inner.state).url.clone()
    }

    /// Get response header (case-insensitive)
    pub fn get_response_header(&self, name: &str) -> Option<String> {
        lock(&self.inner.state).response_headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Get all response headers as string
    pub fn get_all_response_headers(&self) -> String {
        let state = lock(&self.inner.state);
        let mut result = String::new();
        for (name, value) in &state.response_headers {
            result.push_str(&name.to_ascii_lowercase());
            result.push_str(": ");
            result.push_str(value);
            result.push_str("\r\n");
        }
        result
    }

    /// Response body as text (empty until done)
    pub fn response_text(&self) -> String {
        let state = lock(&self.inner.state);
        if state.ready_state != ReadyState::Done {
            return String::new();
        }
        String::from_utf8_lossy(&state.response_bytes).into_owned()
    }

    pub fn response_bytes(&self) -> Vec<u8> {
        lock(&self.inner.state).response_bytes.clone()
    }

    /// Get response based on responseType
    pub fn response(&self) -> XhrResponse {
        let state = lock(&self.inner.state);
        if state.ready_state != ReadyState::Done {
            return XhrResponse::Empty;
        }

        let bytes = &state.response_bytes;
        match state.response_type {
            ResponseType::Text => XhrResponse::Text(String::from_utf8_lossy(bytes).into_owned()),
            ResponseType::ArrayBuffer => XhrResponse::ArrayBuffer(bytes.clone()),
            ResponseType::Blob => XhrResponse::Blob(bytes.clone()),
            ResponseType::Json => XhrResponse::Json(String::from_utf8_lossy(bytes).into_owned()),
            ResponseType::Document => XhrResponse::Document(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Get response as JSON
    pub fn response_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, XhrError> {
        let state = lock(&self.inner.state);
        serde_json::from_slice(&state.response_bytes)
            .map_err(|e| XhrError::ParseError(e.to_string()))
    }
}

impl Transport for XmlHttpRequest {
    fn add_event_listener(&self, target: EventTarget, kind: EventKind, listener: Listener) {
        lock(&self.inner.listeners).push((target, kind, Arc::new(listener)));
    }

    fn set_response_type(&self, response_type: ResponseType) {
        lock(&self.inner.state).response_type = response_type;
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        let mut state = lock(&self.inner.state);
        if state.send_flag {
            tracing::warn!("withCredentials changed after send(); ignored");
            return;
        }
        state.with_credentials = with_credentials;
    }

    /// Open the request
    fn open(&self, method: &Method, url: &str, asynchronous: bool) {
        if !asynchronous {
            tracing::warn!("synchronous XMLHttpRequest is not supported; {} {} runs asynchronously", method, url);
        }

        // Drop an abort signal that raced the end of a previous exchange
        while self.inner.abort_rx.try_recv().is_ok() {}

        let mut state = lock(&self.inner.state);
        state.method = method.clone();
        state.request_headers.clear();
        state.error = None;
        state.url = match resolve_url(self.inner.config.base_url.as_ref(), url) {
            Ok(url) => Some(url),
            Err(e) => {
                state.error = Some(e);
                None
            }
        };
        state.clear_response();
        state.send_flag = false;
        state.upload_complete = false;
        state.ready_state = ReadyState::Opened;
    }

    /// Set request header
    fn set_request_header(&self, name: &str, value: &str) {
        let mut state = lock(&self.inner.state);
        if state.ready_state != ReadyState::Opened || state.send_flag {
            tracing::warn!("setRequestHeader({}) outside the opened state; ignored", name);
            return;
        }

        if !is_valid_header_name(name) || !is_valid_header_value(value) {
            if state.error.is_none() {
                state.error = Some(XhrError::InvalidHeader(name.to_string()));
            }
            return;
        }

        if is_forbidden_header(&name.to_ascii_lowercase()) {
            tracing::warn!("Refused to set forbidden header {}", name);
            return;
        }

        // Combine with existing header if present
        if let Some((_, existing)) = state.request_headers.iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.push_str(", ");
            existing.push_str(value);
        } else {
            state.request_headers.push((name.to_string(), value.to_string()));
        }
    }

    fn send(&self, body: Option<RequestBody>) {
        let prepared = {
            let mut state = lock(&self.inner.state);
            if state.send_flag {
                tracing::warn!("send() called twice on one XMLHttpRequest; ignored");
                return;
            }
            let prepared = if state.ready_state == ReadyState::Opened {
                prepare(&mut state, &self.inner.config, body)
            } else {
                Err(XhrError::InvalidState)
            };
            state.send_flag = true;
            state.ready_state = ReadyState::Opened;
            prepared
        };

        if let Ok(p) = &prepared {
            tracing::info!("HTTP {} {}", p.request.method, p.url);
        }

        let inner = Arc::clone(&self.inner);
        let task = smol::spawn(async move { inner.run(prepared).await });
        *lock(&self.task) = Some(task);
    }

    /// Abort the request
    fn abort(&self) {
        let in_flight = {
            let state = lock(&self.inner.state);
            state.send_flag && state.ready_state != ReadyState::Done
        };
        if !in_flight {
            return;
        }

        tracing::debug!("aborting XMLHttpRequest");
        let _ = self.inner.abort_tx.try_send(());
    }

    fn status(&self) -> u16 {
        lock(&self.inner.state).status
    }

    fn status_text(&self) -> String {
        lock(&self.inner.state).status_text.clone()
    }
}

impl XhrInner {
    async fn run(self: Arc<Self>, prepared: Result<Prepared, XhrError>) {
        self.dispatch(EventTarget::Download, EventKind::LoadStart, 0, None);

        let outcome = match prepared {
            Err(e) => Outcome::Failed(e),
            Ok(prepared) => {
                if let Some(len) = prepared.upload_len {
                    self.dispatch(EventTarget::Upload, EventKind::LoadStart, 0, Some(len));
                }

                let abort_rx = self.abort_rx.clone();
                smol::future::or(
                    async move {
                        let _ = abort_rx.recv().await;
                        Outcome::Aborted
                    },
                    async {
                        match self.exchange(&prepared).await {
                            Ok(response) => Outcome::Complete(response),
                            Err(e) => Outcome::Failed(e),
                        }
                    },
                ).await
            }
        };

        match outcome {
            Outcome::Complete(response) => {
                let len = response.body.len() as u64;
                {
                    let mut state = lock(&self.state);
                    state.status = response.status;
                    state.status_text = response.reason;
                    state.response_headers = response.headers;
                    state.response_bytes = response.body;
                    state.ready_state = ReadyState::Done;
                    state.send_flag = false;
                }
                self.dispatch(EventTarget::Download, EventKind::Load, len, Some(len));
                self.dispatch(EventTarget::Download, EventKind::LoadEnd, len, Some(len));
            }
            Outcome::Failed(e) => {
                tracing::debug!("XMLHttpRequest failed: {}", e);
                let message = e.to_string();
                self.finish_unsuccessfully(EventKind::Error, message);
            }
            Outcome::Aborted => self.finish_unsuccessfully(EventKind::Abort, String::new()),
        }

        lock(&self.listeners).clear();
    }

    async fn exchange(&self, prepared: &Prepared) -> Result<Http1Response, XhrError> {
        let url = &prepared.url;
        let port = url.port_or_known_default()
            .ok_or_else(|| XhrError::InvalidUrl(url.to_string()))?;

        let mut stream = match url.host() {
            Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await?,
            Some(Host::Ipv4(ip)) => TcpStream::connect(SocketAddr::from((ip, port))).await?,
            Some(Host::Ipv6(ip)) => TcpStream::connect(SocketAddr::from((ip, port))).await?,
            None => return Err(XhrError::InvalidUrl(url.to_string())),
        };

        prepared.request.write_to(&mut stream).await?;

        if let Some(len) = prepared.upload_len {
            lock(&self.state).upload_complete = true;
            self.dispatch(EventTarget::Upload, EventKind::Progress, len, Some(len));
            self.dispatch(EventTarget::Upload, EventKind::Load, len, Some(len));
            self.dispatch(EventTarget::Upload, EventKind::LoadEnd, len, Some(len));
        }

        lock(&self.state).ready_state = ReadyState::HeadersReceived;

        let mut reader = BufReader::new(stream);
        Http1Parser::new(self.config.max_response_bytes)
            .on_progress(|loaded, total| {
                lock(&self.state).ready_state = ReadyState::Loading;
                self.dispatch(EventTarget::Download, EventKind::Progress, loaded, total);
            })
            .parse(&mut reader, prepared.expect_body)
            .await
    }

    /// Error or abort: reset the response and notify both sides
    fn finish_unsuccessfully(&self, kind: EventKind, status_text: String) {
        let upload_pending = {
            let mut state = lock(&self.state);
            state.clear_response();
            state.status_text = status_text;
            state.ready_state = ReadyState::Done;
            state.send_flag = false;
            let pending = !state.upload_complete;
            state.upload_complete = true;
            pending
        };

        if upload_pending && self.has_listeners(EventTarget::Upload) {
            self.dispatch(EventTarget::Upload, kind, 0, None);
            self.dispatch(EventTarget::Upload, EventKind::LoadEnd, 0, None);
        }
        self.dispatch(EventTarget::Download, kind, 0, None);
        self.dispatch(EventTarget::Download, EventKind::LoadEnd, 0, None);
    }

    fn has_listeners(&self, target: EventTarget) -> bool {
        lock(&self.listeners).iter().any(|(t, _, _)| *t == target)
    }

    fn dispatch(&self, target: EventTarget, kind: EventKind, loaded: u64, total: Option<u64>) {
        let event = ProgressEvent::new(target, kind, loaded, total);
        let listeners: Vec<_> = lock(&self.listeners).iter()
            .filter(|(t, k, _)| *t == target && *k == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        tracing::trace!(side = ?target, event = kind.as_str(), loaded, "xhr event");
        for listener in listeners {
            (**listener)(&event);
        }
    }
}

impl fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("XmlHttpRequest")
            .field("ready_state", &state.ready_state)
            .field("method", &state.method)
            .field("url", &state.url.as_ref().map(Url::as_str))
            .field("status", &state.status)
            .finish_non_exhaustive()
    }
}

fn prepare(state: &mut XhrState, config: &XhrConfig, body: Option<RequestBody>) -> Result<Prepared, XhrError> {
    if let Some(e) = state.error.take() {
        return Err(e);
    }
    let url = state.url.clone().ok_or(XhrError::InvalidState)?;

    let mut request = Http1Request::new(state.method.wire_name(), &url[Position::BeforePath..Position::AfterQuery])
        .header("Host", &host_header(&url))
        .header("User-Agent", &config.user_agent)
        .header("Accept", "*/*");

    for (name, value) in &config.default_headers {
        if !state.request_headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
            request = request.header(name, value);
        }
    }
    for (name, value) in &state.request_headers {
        request = request.header(name, value);
    }

    let upload_len = match body {
        Some(body) => {
            let (content_type, bytes) = body.encode();
            if let Some(content_type) = content_type {
                if request.get_header("content-type").is_none() {
                    request = request.header("Content-Type", &content_type);
                }
            }
            let len = bytes.len() as u64;
            request = request.body(bytes);
            Some(len)
        }
        None => {
            if !matches!(state.method, Method::Get | Method::Head) {
                request = request.body(Vec::new());
            }
            None
        }
    };

    Ok(Prepared {
        url,
        request: request.header("Connection", "close"),
        expect_body: state.method != Method::Head,
        upload_len,
    })
}

fn resolve_url(base: Option<&Url>, url: &str) -> Result<Url, XhrError> {
    let parsed = match base {
        Some(base) => base.join(url),
        None => Url::parse(url),
    }
    .map_err(|e| XhrError::InvalidUrl(format!("{}: {}", url, e)))?;

    if parsed.scheme() != "http" {
        return Err(XhrError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    Ok(parsed)
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Check if header is forbidden
fn is_forbidden_header(name: &str) -> bool {
    matches!(name,
        "accept-charset" | "accept-encoding" | "access-control-request-headers" |
        "access-control-request-method" | "connection" | "content-length" |
        "cookie" | "cookie2" | "date" | "dnt" | "expect" | "host" |
        "keep-alive" | "origin" | "referer" | "te" | "trailer" |
        "transfer-encoding" | "upgrade" | "via"
    ) || name.starts_with("proxy-") || name.starts_with("sec-")
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| {
        b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
    })
}

fn is_valid_header_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}
