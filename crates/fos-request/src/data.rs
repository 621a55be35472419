//! Request Data
//!
//! Payload shapes accepted by the builder and the body handed to a transport.

use std::collections::HashMap;

use crate::form::FormData;
use crate::params::UrlSearchParams;

/// Raw payload, sent verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawData {
    Text(String),
    Bytes(Vec<u8>),
}

impl RawData {
    /// Text view (bytes are decoded lossily)
    pub fn to_text(&self) -> String {
        match self {
            RawData::Text(text) => text.clone(),
            RawData::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Data attached to a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestData {
    #[default]
    Empty,
    /// Flat key/value mapping, kept in insertion order
    Map(Vec<(String, String)>),
    /// Multipart form
    Form(FormData),
    /// URL-encoded params
    UrlEncoded(UrlSearchParams),
    Raw(RawData),
}

impl RequestData {
    /// Build a key/value mapping
    pub fn map<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RequestData::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestData::Empty)
    }
}

impl From<FormData> for RequestData {
    fn from(form: FormData) -> Self {
        RequestData::Form(form)
    }
}

impl From<UrlSearchParams> for RequestData {
    fn from(params: UrlSearchParams) -> Self {
        RequestData::UrlEncoded(params)
    }
}

impl From<String> for RequestData {
    fn from(text: String) -> Self {
        RequestData::Raw(RawData::Text(text))
    }
}

impl From<&str> for RequestData {
    fn from(text: &str) -> Self {
        RequestData::Raw(RawData::Text(text.to_string()))
    }
}

impl From<Vec<u8>> for RequestData {
    fn from(bytes: Vec<u8>) -> Self {
        RequestData::Raw(RawData::Bytes(bytes))
    }
}

impl From<HashMap<String, String>> for RequestData {
    fn from(map: HashMap<String, String>) -> Self {
        RequestData::Map(map.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for RequestData {
    fn from(pairs: [(K, V); N]) -> Self {
        RequestData::map(pairs)
    }
}

impl<T: Into<RequestData>> From<Option<T>> for RequestData {
    fn from(data: Option<T>) -> Self {
        data.map(Into::into).unwrap_or_default()
    }
}

/// Body handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Bytes(Vec<u8>),
    /// `application/x-www-form-urlencoded` serialization
    UrlEncoded(String),
    Form(FormData),
}

impl RequestBody {
    /// Default `Content-Type` and wire bytes
    pub fn encode(&self) -> (Option<String>, Vec<u8>) {
        match self {
            RequestBody::Text(text) => {
                (Some("text/plain;charset=UTF-8".to_string()), text.as_bytes().to_vec())
            }
            RequestBody::Bytes(bytes) => (None, bytes.clone()),
            RequestBody::UrlEncoded(encoded) => (
                Some("application/x-www-form-urlencoded;charset=UTF-8".to_string()),
                encoded.as_bytes().to_vec(),
            ),
            RequestBody::Form(form) => {
                let (content_type, body) = form.to_multipart_body();
                (Some(content_type), body)
            }
        }
    }

    /// Textual body, if this is one of the string shapes
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(text) | RequestBody::UrlEncoded(text) => Some(text),
            RequestBody::Bytes(_) | RequestBody::Form(_) => None,
        }
    }
}

impl From<RawData> for RequestBody {
    fn from(raw: RawData) -> Self {
        match raw {
            RawData::Text(text) => RequestBody::Text(text),
            RawData::Bytes(bytes) => RequestBody::Bytes(bytes),
        }
    }
}
