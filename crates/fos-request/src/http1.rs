//! HTTP/1.1 Framing
//!
//! Request serialization and async response parsing with progress reporting.

use smol::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::xhr::XhrError;

const CHUNK_SIZE: usize = 8 * 1024;

/// HTTP/1.1 request
#[derive(Debug, Clone)]
pub struct Http1Request {
    /// Method token as sent on the wire
    pub method: String,
    /// Request target (e.g., "/api/users?page=2")
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Http1Request {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Add a header
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Set body
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Get header value (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());

        for (name, value) in &self.headers {
            buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        if let Some(ref body) = self.body {
            if self.get_header("content-length").is_none() {
                buf.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
            }
        }

        buf.extend_from_slice(b"\r\n");

        if let Some(ref body) = self.body {
            buf.extend_from_slice(body);
        }

        buf
    }

    /// Write to a stream
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), XhrError> {
        writer.write_all(&self.serialize()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// HTTP/1.1 response
#[derive(Debug, Clone, Default)]
pub struct Http1Response {
    pub status: u16,
    /// Status reason phrase
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Http1Response {
    /// Get header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Check if chunked transfer encoding
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    /// Statuses that never carry a body
    fn is_bodiless(&self) -> bool {
        (100..200).contains(&self.status) || self.status == 204 || self.status == 304
    }
}

/// Async response reader
///
/// `on_progress` is called after every body chunk with the bytes read so far
/// and the announced length, when there is one.
pub struct Http1Parser<'a> {
    limit: usize,
    on_progress: Box<dyn FnMut(u64, Option<u64>) + Send + 'a>,
}

impl<'a> Http1Parser<'a> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            on_progress: Box::new(|_, _| {}),
        }
    }

    pub fn on_progress(mut self, callback: impl FnMut(u64, Option<u64>) + Send + 'a) -> Self {
        self.on_progress = Box::new(callback);
        self
    }

    /// Parse a full response; `expect_body` is false for HEAD requests
    pub async fn parse<R: AsyncBufRead + Unpin>(
        mut self,
        reader: &mut R,
        expect_body: bool,
    ) -> Result<Http1Response, XhrError> {
        let mut response = Http1Response::default();

        // Interim 1xx responses are skipped
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Err(XhrError::Malformed("connection closed before status line".into()));
            }
            parse_status_line(&line, &mut response)?;
            response.headers = read_headers(reader).await?;

            if !(100..200).contains(&response.status) {
                break;
            }
        }

        if !expect_body || response.is_bodiless() {
            return Ok(response);
        }

        response.body = if response.is_chunked() {
            self.read_chunked_body(reader).await?
        } else if let Some(len) = response.content_length() {
            self.read_sized_body(reader, len).await?
        } else {
            self.read_until_close(reader).await?
        };

        Ok(response)
    }

    async fn read_sized_body<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
        len: u64,
    ) -> Result<Vec<u8>, XhrError> {
        if len > self.limit as u64 {
            return Err(XhrError::TooLarge(self.limit));
        }

        let mut body = Vec::with_capacity(len as usize);
        let mut buf = [0u8; CHUNK_SIZE];

        while (body.len() as u64) < len {
            let want = CHUNK_SIZE.min((len - body.len() as u64) as usize);
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(XhrError::Malformed("unexpected end of body".into()));
            }
            body.extend_from_slice(&buf[..n]);
            (self.on_progress)(body.len() as u64, Some(len));
        }

        Ok(body)
    }

    async fn read_chunked_body<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Vec<u8>, XhrError> {
        let mut body = Vec::new();

        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;

            // Chunk extensions follow a ';'
            let size_str = line.trim().split(';').next().unwrap_or("");
            let size = usize::from_str_radix(size_str, 16)
                .map_err(|_| XhrError::Malformed(format!("invalid chunk size: {:?}", size_str)))?;

            if size == 0 {
                // Trailers up to the blank line
                read_headers(reader).await?;
                break;
            }

            if body.len() + size > self.limit {
                return Err(XhrError::TooLarge(self.limit));
            }

            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..]).await?;
            (self.on_progress)(body.len() as u64, None);

            line.clear();
            reader.read_line(&mut line).await?;
        }

        Ok(body)
    }

    async fn read_until_close<R: AsyncBufRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Vec<u8>, XhrError> {
        let mut body = Vec::new();
        let mut buf = [0u8; CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if body.len() + n > self.limit {
                return Err(XhrError::TooLarge(self.limit));
            }
            body.extend_from_slice(&buf[..n]);
            (self.on_progress)(body.len() as u64, None);
        }

        Ok(body)
    }
}

fn parse_status_line(line: &str, response: &mut Http1Response) -> Result<(), XhrError> {
    let line = line.trim_end();
    let mut parts = line.splitn(3, ' ');

    match parts.next() {
        Some("HTTP/1.0") | Some("HTTP/1.1") => {}
        _ => return Err(XhrError::Malformed(format!("invalid status line: {:?}", line))),
    }

    response.status = parts.next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| XhrError::Malformed(format!("invalid status code: {:?}", line)))?;

    response.reason = parts.next().unwrap_or("").to_string();

    Ok(())
}

async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<(String, String)>, XhrError> {
    let mut headers = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(XhrError::Malformed("connection closed inside headers".into()));
        }

        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }

        if let Some(colon_pos) = trimmed.find(':') {
            let name = trimmed[..colon_pos].trim().to_string();
            let value = trimmed[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }
    }

    Ok(headers)
}
