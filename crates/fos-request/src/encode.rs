//! Request Encoding
//!
//! Turns request data and the effective method into a query fragment and/or
//! a body. Reads carry their data in the query string, every other method
//! carries it in the body.

use crate::data::{RequestBody, RequestData};
use crate::params::UrlSearchParams;
use crate::request::Method;

/// Encoding result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    /// Fragment to append to the URL query (never empty)
    pub query: Option<String>,
    pub body: Option<RequestBody>,
}

impl Encoded {
    fn query(query: String) -> Self {
        Self {
            query: Some(query).filter(|q| !q.is_empty()),
            body: None,
        }
    }

    fn body(body: RequestBody) -> Self {
        Self { query: None, body: Some(body) }
    }
}

/// Encode `data` for `method`
pub fn encode(data: &RequestData, method: &Method) -> Encoded {
    let read = method.is_get();

    match data {
        RequestData::Empty => Encoded::default(),
        RequestData::Form(form) => {
            if read {
                Encoded::query(UrlSearchParams::from(form).to_string())
            } else {
                Encoded::body(RequestBody::Form(form.clone()))
            }
        }
        RequestData::UrlEncoded(params) => {
            let encoded = params.to_string();
            if read {
                Encoded::query(encoded)
            } else {
                Encoded::body(RequestBody::UrlEncoded(encoded))
            }
        }
        RequestData::Map(pairs) => {
            let encoded = encode_pairs(pairs);
            if read {
                Encoded::query(encoded)
            } else {
                Encoded::body(RequestBody::UrlEncoded(encoded))
            }
        }
        RequestData::Raw(raw) => {
            if read {
                Encoded::query(UrlSearchParams::parse(&raw.to_text()).to_string())
            } else {
                Encoded::body(RequestBody::from(raw.clone()))
            }
        }
    }
}

/// `key=value` pairs joined by `&`, each side percent-encoded
pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    pairs.iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append `query` to the query already present in `url`
///
/// Existing parameters are kept (duplicates included) and a `#fragment`
/// stays at the end.
pub fn merge_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }

    let (base, fragment) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };

    let separator = match base.find('?') {
        None => "?",
        Some(_) if base.ends_with('?') || base.ends_with('&') => "",
        Some(_) => "&",
    };

    format!("{}{}{}{}", base, separator, query, fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawData;
    use crate::form::FormData;

    fn map() -> RequestData {
        RequestData::map([("a", "1"), ("b", "2")])
    }

    #[test]
    fn test_map_get_goes_to_query() {
        let encoded = encode(&map(), &Method::Get);
        assert_eq!(encoded.query.as_deref(), Some("a=1&b=2"));
        assert!(encoded.body.is_none());
    }

    #[test]
    fn test_map_post_goes_to_body() {
        let encoded = encode(&map(), &Method::Post);
        assert!(encoded.query.is_none());
        assert_eq!(encoded.body, Some(RequestBody::UrlEncoded("a=1&b=2".into())));
    }

    #[test]
    fn test_map_percent_encoding() {
        let data = RequestData::map([("a b", "x&y=z"), ("ü", "/")]);
        let encoded = encode(&data, &Method::Get);
        assert_eq!(encoded.query.as_deref(), Some("a%20b=x%26y%3Dz&%C3%BC=%2F"));
    }

    #[test]
    fn test_form_passthrough_for_writes() {
        let mut form = FormData::new();
        form.append("test1", "value1");
        let encoded = encode(&RequestData::Form(form.clone()), &Method::Put);
        assert_eq!(encoded.body, Some(RequestBody::Form(form)));
    }

    #[test]
    fn test_raw_get_is_reparsed() {
        let data = RequestData::Raw(RawData::Text("?test1=value1&test2=value%202".into()));
        let encoded = encode(&data, &Method::Get);
        assert_eq!(encoded.query.as_deref(), Some("test1=value1&test2=value+2"));
    }

    #[test]
    fn test_raw_write_is_verbatim() {
        let data = RequestData::Raw(RawData::Bytes(vec![1, 2, 3]));
        let encoded = encode(&data, &Method::Delete);
        assert_eq!(encoded.body, Some(RequestBody::Bytes(vec![1, 2, 3])));
    }

    #[test]
    fn test_empty() {
        assert_eq!(encode(&RequestData::Empty, &Method::Get), Encoded::default());
        assert_eq!(encode(&RequestData::Empty, &Method::Post), Encoded::default());
        assert_eq!(encode(&RequestData::from(""), &Method::Get), Encoded::default());
    }

    #[test]
    fn test_merge_query() {
        assert_eq!(merge_query("/test", "a=1"), "/test?a=1");
        assert_eq!(merge_query("/test?x=0", "a=1"), "/test?x=0&a=1");
        assert_eq!(merge_query("/test?", "a=1"), "/test?a=1");
        assert_eq!(merge_query("/test?a=0#top", "a=1"), "/test?a=0&a=1#top");
        assert_eq!(merge_query("/test#top", ""), "/test#top");
    }
}
