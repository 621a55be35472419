//! FormData
//!
//! Multipart form payloads. Sent untouched as a request body, or flattened
//! into the query string for reads.

/// FormData for requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<(String, FormDataValue)>,
}

/// FormData value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormDataValue {
    Text(String),
    File { name: String, content: Vec<u8>, content_type: String },
}

impl FormDataValue {
    /// String form used when the entry is flattened into a query
    pub fn as_query_value(&self) -> &str {
        match self {
            FormDataValue::Text(text) => text,
            FormDataValue::File { name, .. } => name,
        }
    }
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), FormDataValue::Text(value.to_string())));
    }

    pub fn append_file(&mut self, name: &str, filename: &str, content: Vec<u8>, content_type: &str) {
        self.entries.push((name.to_string(), FormDataValue::File {
            name: filename.to_string(),
            content,
            content_type: content_type.to_string(),
        }));
    }

    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    pub fn get(&self, name: &str) -> Option<&FormDataValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormDataValue> {
        self.entries.iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Replace every entry named `name` with a single text entry
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter().position(|(n, _)| n == name) {
            Some(first) => {
                self.entries[first].1 = FormDataValue::Text(value.to_string());
                let mut index = 0;
                self.entries.retain(|(n, _)| {
                    let keep = n != name || index == first;
                    index += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormDataValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to multipart form data body
    ///
    /// Returns the `Content-Type` header value (carrying the boundary) and
    /// the encoded body.
    pub fn to_multipart_body(&self) -> (String, Vec<u8>) {
        self.to_multipart_body_with_boundary(&format!("----FormBoundary{:x}", rand_boundary()))
    }

    pub fn to_multipart_body_with_boundary(&self, boundary: &str) -> (String, Vec<u8>) {
        let mut body = Vec::new();

        for (name, value) in &self.entries {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());

            match value {
                FormDataValue::Text(text) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes()
                    );
                    body.extend_from_slice(text.as_bytes());
                }
                FormDataValue::File { name: filename, content, content_type } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: {}\r\n\r\n",
                            name, filename, content_type
                        ).as_bytes()
                    );
                    body.extend_from_slice(content);
                }
            }
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        let content_type = format!("multipart/form-data; boundary={}", boundary);
        (content_type, body)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter.into_iter()
            .map(|(k, v)| (k.into(), FormDataValue::Text(v.into())))
            .collect();
        Self { entries }
    }
}

fn rand_boundary() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(12345)
}
