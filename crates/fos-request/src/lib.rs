//! fOS Request
//!
//! Fluent HTTP request builder over an `XMLHttpRequest`-style transport.
//!
//! ```no_run
//! use fos_request::{RequestBuilder, RequestData, Transport};
//!
//! smol::block_on(async {
//!     let mut req = RequestBuilder::new("http://localhost:8080/echo");
//!     req.set_header("Accept", "application/json");
//!
//!     match req.send_data(RequestData::map([("a", "1"), ("b", "2")])).await {
//!         Ok(xhr) => println!("{} {}", xhr.status(), xhr.response_text()),
//!         Err(e) if e.is_abort() => println!("cancelled"),
//!         Err(e) => println!("failed: {}", e),
//!     }
//! });
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod request;
pub mod data;
pub mod encode;
pub mod form;
pub mod params;
pub mod error;
pub mod transport;
pub mod xhr;
pub mod http1;

pub use request::{RequestBuilder, PendingRequest, Method, Headers, SuccessCallback};
pub use data::{RequestData, RequestBody, RawData};
pub use encode::{encode, merge_query, Encoded};
pub use form::{FormData, FormDataValue};
pub use params::UrlSearchParams;
pub use error::{AbortError, ConnectionError, RequestError, ABORT_MESSAGE, CONNECTION_FALLBACK_MESSAGE};
pub use transport::{Transport, TransportFactory, EventTarget, EventKind, ProgressEvent, Listener, EventCallback};
pub use xhr::{XmlHttpRequest, XhrFactory, XhrFactoryBuilder, XhrConfig, XhrError, XhrResponse, ReadyState, ResponseType};
pub use url::Url;

/// Lock a mutex, recovering the data from a poisoned one
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
