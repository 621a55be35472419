//! Request Builder
//!
//! A reusable, fluently configured request. Each `send` derives the
//! effective method, encodes the data, obtains one transport from the
//! factory and returns a future that settles exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use smol::channel::{self, Sender};
use smol::future::{Boxed, FutureExt};

use crate::data::RequestData;
use crate::encode::{self, Encoded};
use crate::error::{AbortError, ConnectionError, RequestError, ABORT_MESSAGE, CONNECTION_FALLBACK_MESSAGE};
use crate::lock;
use crate::transport::{EventCallback, EventKind, EventTarget, ProgressEvent, Transport, TransportFactory};
use crate::xhr::{ResponseType, XhrFactory};

/// HTTP method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    /// Any other verb, kept verbatim
    Other(String),
}

impl Method {
    /// Method token (`get`, `post`, ...)
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Delete => "delete",
            Method::Patch => "patch",
            Method::Head => "head",
            Method::Options => "options",
            Method::Other(verb) => verb,
        }
    }

    /// Method as written on the request line
    pub fn wire_name(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other(verb) => verb,
        }
    }

    /// Reads carry their data in the query string
    pub fn is_get(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        const KNOWN: [(&str, Method); 7] = [
            ("get", Method::Get),
            ("post", Method::Post),
            ("put", Method::Put),
            ("delete", Method::Delete),
            ("patch", Method::Patch),
            ("head", Method::Head),
            ("options", Method::Options),
        ];

        KNOWN.into_iter()
            .find(|(token, _)| s.eq_ignore_ascii_case(token))
            .map(|(_, method)| method)
            .unwrap_or_else(|| Method::Other(s.to_string()))
    }
}

impl From<String> for Method {
    fn from(s: String) -> Self {
        Method::from(s.as_str())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request headers, matched case-insensitively and kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header value (replaces any existing)
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name.as_ref(), value.as_ref());
        }
        headers
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> From<[(K, V); N]> for Headers {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

/// Called with the transport when a send fulfils
pub type SuccessCallback<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Outcome reported by the terminal listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Load,
    Error,
    Abort,
}

/// Shared by the terminal listeners of one send; only the first event counts
struct Settler<T> {
    settled: AtomicBool,
    tx: Sender<Settlement>,
    active: Arc<Mutex<Option<Arc<T>>>>,
    transport: Weak<T>,
}

impl<T> Settler<T> {
    fn settle(&self, outcome: Settlement) {
        if self.settled.swap(true, Ordering::AcqRel) {
            return;
        }

        // Release the handle only if a later send has not replaced it
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self.transport.as_ptr())) {
            *active = None;
        }
        drop(active);

        tracing::trace!(?outcome, "request settled");
        let _ = self.tx.try_send(outcome);
    }
}

/// Future returned by [`RequestBuilder::send`]
///
/// Resolves to the transport on success, including HTTP error statuses.
#[must_use = "the request outcome is only observable by awaiting it"]
pub struct PendingRequest<T: 'static> {
    inner: Boxed<Result<Arc<T>, RequestError<T>>>,
}

impl<T: 'static> Future for PendingRequest<T> {
    type Output = Result<Arc<T>, RequestError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T: 'static> fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").finish_non_exhaustive()
    }
}

/// Request builder
pub struct RequestBuilder<F: TransportFactory = XhrFactory> {
    url: String,
    method: Option<Method>,
    data: RequestData,
    headers: Headers,
    response_type: Option<ResponseType>,
    with_credentials: Option<bool>,
    download_callback: Option<EventCallback>,
    upload_callback: Option<EventCallback>,
    success_callback: Option<SuccessCallback<F::Transport>>,
    active: Arc<Mutex<Option<Arc<F::Transport>>>>,
    factory: F,
}

impl RequestBuilder<XhrFactory> {
    /// Request sent through the default [`XmlHttpRequest`](crate::XmlHttpRequest) transport
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_factory(url, XhrFactory::default())
    }
}

impl<F: TransportFactory> RequestBuilder<F> {
    /// Request sent through transports created by `factory`
    pub fn with_factory(url: impl Into<String>, factory: F) -> Self {
        Self {
            url: url.into(),
            method: None,
            data: RequestData::Empty,
            headers: Headers::new(),
            response_type: None,
            with_credentials: None,
            download_callback: None,
            upload_callback: None,
            success_callback: None,
            active: Arc::new(Mutex::new(None)),
            factory,
        }
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    pub fn set_method(&mut self, method: impl Into<Method>) -> &mut Self {
        self.method = Some(method.into());
        self
    }

    pub fn set_data(&mut self, data: impl Into<RequestData>) -> &mut Self {
        self.data = data.into();
        self
    }

    /// Replace all headers
    pub fn set_headers(&mut self, headers: impl Into<Headers>) -> &mut Self {
        self.headers = headers.into();
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    pub fn set_response_type(&mut self, response_type: ResponseType) -> &mut Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn set_with_credentials(&mut self, with_credentials: bool) -> &mut Self {
        self.with_credentials = Some(with_credentials);
        self
    }

    /// Set both event callbacks; `None` removes one
    pub fn set_event_callback(
        &mut self,
        download: Option<EventCallback>,
        upload: Option<EventCallback>,
    ) -> &mut Self {
        self.download_callback = download;
        self.upload_callback = upload;
        self
    }

    pub fn set_download_callback(
        &mut self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> &mut Self {
        self.download_callback = Some(Arc::new(callback));
        self
    }

    pub fn set_upload_callback(
        &mut self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> &mut Self {
        self.upload_callback = Some(Arc::new(callback));
        self
    }

    /// Callback run with the transport when a send fulfils
    pub fn on_success(
        &mut self,
        callback: impl Fn(&Arc<F::Transport>) + Send + Sync + 'static,
    ) -> &mut Self {
        self.success_callback = Some(Arc::new(callback));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn data(&self) -> &RequestData {
        &self.data
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Transport of the most recent send, while it is in flight
    pub fn active(&self) -> Option<Arc<F::Transport>> {
        lock(&self.active).clone()
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Send with the configured data and method
    pub fn send(&mut self) -> PendingRequest<F::Transport> {
        self.send_with(None, None)
    }

    /// Store `data` and send it; the method defaults to POST when none is configured
    pub fn send_data(&mut self, data: impl Into<RequestData>) -> PendingRequest<F::Transport> {
        self.send_with(Some(data.into()), None)
    }

    /// Send, optionally replacing the data and overriding the method for this call
    ///
    /// Everything up to the transport's `send` happens before this returns.
    /// A send issued while an earlier one is still pending does not cancel
    /// it: both settle independently, and [`abort`](Self::abort) only
    /// reaches the most recent one.
    pub fn send_with(
        &mut self,
        data: Option<RequestData>,
        method: Option<Method>,
    ) -> PendingRequest<F::Transport> {
        let mut implied = None;
        if let Some(data) = data {
            self.data = data;
            if self.method.is_none() && method.is_none() {
                implied = Some(Method::Post);
            }
        }

        let method = method
            .or(implied)
            .or_else(|| self.method.clone())
            .unwrap_or_default();

        let Encoded { query, body } = encode::encode(&self.data, &method);
        let url = match &query {
            Some(query) => encode::merge_query(&self.url, query),
            None => self.url.clone(),
        };

        let transport = self.factory.create();
        *lock(&self.active) = Some(Arc::clone(&transport));

        for (target, callback) in [
            (EventTarget::Download, &self.download_callback),
            (EventTarget::Upload, &self.upload_callback),
        ] {
            if let Some(callback) = callback {
                for kind in EventKind::ALL {
                    let callback = Arc::clone(callback);
                    transport.add_event_listener(target, kind, Box::new(move |event: &ProgressEvent| callback(event)));
                }
            }
        }

        let (tx, rx) = channel::bounded(1);
        let settler = Arc::new(Settler {
            settled: AtomicBool::new(false),
            tx,
            active: Arc::clone(&self.active),
            transport: Arc::downgrade(&transport),
        });
        for (kind, outcome) in [
            (EventKind::Load, Settlement::Load),
            (EventKind::Error, Settlement::Error),
            (EventKind::Abort, Settlement::Abort),
        ] {
            let settler = Arc::clone(&settler);
            transport.add_event_listener(
                EventTarget::Download,
                kind,
                Box::new(move |_: &ProgressEvent| settler.settle(outcome)),
            );
        }

        if let Some(response_type) = self.response_type {
            transport.set_response_type(response_type);
        }
        if let Some(with_credentials) = self.with_credentials {
            transport.set_with_credentials(with_credentials);
        }

        tracing::debug!("dispatching {} {}", method, url);
        transport.open(&method, &url, true);
        for (name, value) in self.headers.iter() {
            transport.set_request_header(name, value);
        }
        transport.send(body);

        let on_success = self.success_callback.clone();
        let inner = async move {
            // A closed channel means the transport dropped its listeners unsettled
            let outcome = rx.recv().await.unwrap_or(Settlement::Error);
            match outcome {
                Settlement::Load => {
                    if let Some(callback) = on_success {
                        callback(&transport);
                    }
                    Ok(transport)
                }
                Settlement::Error => {
                    let status_text = transport.status_text();
                    let message = if status_text.is_empty() {
                        CONNECTION_FALLBACK_MESSAGE.to_string()
                    } else {
                        status_text
                    };
                    Err(ConnectionError::new(message, transport).into())
                }
                Settlement::Abort => Err(AbortError::new(ABORT_MESSAGE, transport).into()),
            }
        };

        PendingRequest { inner: inner.boxed() }
    }

    /// Cancel the most recent send, if it is still in flight
    ///
    /// Settlement happens later, through the transport's abort event.
    pub fn abort(&self) {
        let active = lock(&self.active).clone();
        if let Some(transport) = active {
            transport.abort();
        }
    }
}

impl<F: TransportFactory + fmt::Debug> fmt::Debug for RequestBuilder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("data", &self.data)
            .field("headers", &self.headers)
            .field("response_type", &self.response_type)
            .field("with_credentials", &self.with_credentials)
            .field("pending", &self.is_pending())
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}
