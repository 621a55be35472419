//! End-to-end tests: the builder driving the XMLHttpRequest transport
//! against a local echo server.

mod common;

use std::sync::{Arc, Mutex};

use common::{event_log, recorder};
use fos_request::*;
use serde_json::{json, Value};
use smol::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use smol::net::{TcpListener, TcpStream};

// ============================================================================
// ECHO SERVER
// ============================================================================

/// Start the echo server and return its origin
///
/// * `/error` closes the connection without answering
/// * `/fail` answers 404
/// * `/abort` never answers
/// * GET echoes the query as a JSON object, POST echoes the form body;
///   an empty payload answers `abc123`
fn serve() -> Url {
    let listener = smol::block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();

    smol::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            smol::spawn(handle(stream)).detach();
        }
    })
    .detach();

    Url::parse(&format!("http://{}/", addr)).unwrap()
}

async fn handle(mut stream: TcpStream) {
    let mut reader = BufReader::new(stream.clone());

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    let header = |name: &str| headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());

    let length: usize = header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
    let mut body = vec![0u8; length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let (status, payload) = match path {
        "/error" => return,
        "/abort" => {
            // Hold the connection until the client goes away
            let mut buf = [0u8; 1];
            let _ = reader.read(&mut buf).await;
            return;
        }
        "/fail" => ("404 Not Found", String::new()),
        _ if method == "GET" => ("200 OK", echo(url_pairs(query.as_bytes()))),
        _ => {
            let content_type = header("content-type").unwrap_or_default();
            let pairs = match content_type.split_once("boundary=") {
                Some((_, boundary)) => multipart_pairs(&body, boundary),
                None => url_pairs(&body),
            };
            ("200 OK", echo(pairs))
        }
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}

fn url_pairs(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input).into_owned().collect()
}

fn multipart_pairs(body: &[u8], boundary: &str) -> Vec<(String, String)> {
    let body = String::from_utf8_lossy(body);
    body.split(&format!("--{}", boundary))
        .filter_map(|part| {
            let (head, data) = part.split_once("\r\n\r\n")?;
            let name = head.split("name=\"").nth(1)?.split('"').next()?;
            Some((name.to_string(), data.trim_end_matches("\r\n").to_string()))
        })
        .collect()
}

fn echo(pairs: Vec<(String, String)>) -> String {
    if pairs.is_empty() {
        return "abc123".into();
    }
    let object: serde_json::Map<String, Value> =
        pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
    Value::Object(object).to_string()
}

fn builder(base: &Url, path: &str) -> RequestBuilder {
    let factory = XhrFactory::builder().base_url(base.clone()).build();
    RequestBuilder::with_factory(path, factory)
}

fn test_form() -> FormData {
    let mut form = FormData::new();
    form.set("test1", "value1");
    form.set("test2", "value2");
    form
}

fn expected() -> Value {
    json!({"test1": "value1", "test2": "value2"})
}

// ============================================================================
// ROUND TRIP TESTS
// ============================================================================

#[test]
fn test_request() {
    let base = serve();
    let mut req = builder(&base, "/test");

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.status(), 200);
    assert_eq!(xhr.status_text(), "OK");
    assert_eq!(xhr.ready_state(), ReadyState::Done);
    assert_eq!(xhr.response_text(), "abc123");
    assert_eq!(xhr.get_response_header("content-type").as_deref(), Some("text/plain"));
}

#[test]
fn test_absolute_url_without_base() {
    let base = serve();
    let mut req = RequestBuilder::new(base.join("/test").unwrap().to_string());

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.response_text(), "abc123");
}

#[test]
fn test_form_data_post() {
    let base = serve();
    let mut req = builder(&base, "/test");
    req.set_method(Method::Post).set_data(test_form());

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.response_json::<Value>().unwrap(), expected());
}

#[test]
fn test_form_data_get() {
    let base = serve();
    let mut req = builder(&base, "/test");
    req.set_method(Method::Get).set_data(test_form());

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.response_json::<Value>().unwrap(), expected());
}

#[test]
fn test_url_search_params() {
    let base = serve();
    let mut params = UrlSearchParams::new();
    params.set("test1", "value1");
    params.set("test2", "value2");

    let mut req = builder(&base, "/test");
    let xhr = smol::block_on(req.send_data(params)).unwrap();
    assert_eq!(xhr.response_json::<Value>().unwrap(), expected());
}

#[test]
fn test_url_search_params_string() {
    let base = serve();
    let mut params = UrlSearchParams::new();
    params.set("test1", "value1");
    params.set("test2", "value2");

    let mut req = builder(&base, "/test");
    req.set_method(Method::Get).set_data(params.to_string());

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.response_json::<Value>().unwrap(), expected());
}

#[test]
fn test_map_post() {
    let base = serve();
    let mut req = builder(&base, "/test");

    let xhr = smol::block_on(req.send_data([("name", "a b"), ("x", "&=")])).unwrap();
    assert_eq!(xhr.response_json::<Value>().unwrap(), json!({"name": "a b", "x": "&="}));
}

#[test]
fn test_json_response_type() {
    let base = serve();
    let mut req = builder(&base, "/test");
    req.set_response_type(ResponseType::Json).set_data([("a", "1")]);

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.response(), XhrResponse::Json("{\"a\":\"1\"}".into()));
}

// ============================================================================
// FAILURE TESTS
// ============================================================================

#[test]
fn test_abort() {
    let base = serve();
    let mut req = builder(&base, "/abort");

    let pending = req.send();
    req.abort();

    let err = smol::block_on(pending).unwrap_err();
    assert!(err.is_abort());
    assert_eq!(err.message(), ABORT_MESSAGE);
    assert_eq!(err.transport().status(), 0);
}

#[test]
fn test_error() {
    let base = serve();
    let mut req = builder(&base, "/error");

    let err = smol::block_on(req.send()).unwrap_err();
    assert!(err.is_connection());
    assert!(!err.message().is_empty());
    assert_eq!(err.transport().status(), 0);
}

#[test]
fn test_connection_refused() {
    let addr = smol::block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    });

    let mut req = RequestBuilder::new(format!("http://{}/test", addr));
    let err = smol::block_on(req.send()).unwrap_err();
    assert!(matches!(err, RequestError::Connection(_)));
}

#[test]
fn test_unsupported_scheme_is_connection_error() {
    let mut req = RequestBuilder::new("https://127.0.0.1:1/test");
    let err = smol::block_on(req.send()).unwrap_err();
    assert!(err.is_connection());
    assert!(err.message().contains("https"));
}

#[test]
fn test_not_found_fulfils() {
    let base = serve();
    let mut req = builder(&base, "/fail");

    let xhr = smol::block_on(req.send()).unwrap();
    assert_eq!(xhr.status(), 404);
    assert_eq!(xhr.response_text(), "");
}

// ============================================================================
// EVENT TESTS
// ============================================================================

#[test]
fn test_download_and_upload_events() {
    let base = serve();
    let download = event_log();
    let upload = event_log();

    let mut req = builder(&base, "/test");
    req.set_download_callback(recorder(&download))
        .set_upload_callback(recorder(&upload));

    smol::block_on(req.send_data(test_form())).unwrap();

    assert_eq!(
        *upload.lock().unwrap(),
        vec![
            (EventTarget::Upload, EventKind::LoadStart),
            (EventTarget::Upload, EventKind::Progress),
            (EventTarget::Upload, EventKind::Load),
            (EventTarget::Upload, EventKind::LoadEnd),
        ]
    );

    let download = download.lock().unwrap();
    assert_eq!(download.first(), Some(&(EventTarget::Download, EventKind::LoadStart)));
    assert!(download.contains(&(EventTarget::Download, EventKind::Progress)));
    assert!(download.contains(&(EventTarget::Download, EventKind::Load)));
    assert!(!download.contains(&(EventTarget::Download, EventKind::Error)));
}

#[test]
fn test_get_has_no_upload_events() {
    let base = serve();
    let upload = event_log();

    let mut req = builder(&base, "/test");
    req.set_upload_callback(recorder(&upload));

    smol::block_on(req.send()).unwrap();
    assert!(upload.lock().unwrap().is_empty());
}

#[test]
fn test_on_success_sees_response() {
    let base = serve();
    let seen = Arc::new(Mutex::new(String::new()));

    let mut req = builder(&base, "/test");
    {
        let seen = Arc::clone(&seen);
        req.on_success(move |xhr| *seen.lock().unwrap() = xhr.response_text());
    }

    smol::block_on(req.send()).unwrap();
    assert_eq!(*seen.lock().unwrap(), "abc123");
}
