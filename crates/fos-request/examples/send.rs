//! Example: send a request and watch its progress
//!
//! ```text
//! cargo run -p fos-request --example send -- http://127.0.0.1:8080/echo name=value
//! ```

use fos_request::{EventKind, RequestBuilder, RequestData, Transport};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "http://127.0.0.1:8080/".to_string());
    let pairs: Vec<(String, String)> = args
        .filter_map(|arg| arg.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect();

    let mut req = RequestBuilder::new(url);
    req.set_header("Accept", "application/json")
        .set_download_callback(|event| {
            if event.kind == EventKind::Progress {
                println!("downloaded {} bytes", event.loaded);
            }
        });

    let pending = if pairs.is_empty() {
        req.send()
    } else {
        req.send_data(RequestData::Map(pairs))
    };

    let xhr = smol::block_on(pending)?;
    println!("{} {}", xhr.status(), xhr.status_text());
    println!("{}", xhr.response_text());

    Ok(())
}
