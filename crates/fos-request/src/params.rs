//! URLSearchParams
//!
//! Ordered `application/x-www-form-urlencoded` name/value list.

use std::fmt;

use url::form_urlencoded;

use crate::form::FormData;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSearchParams {
    pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string; a single leading `?` is ignored
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.pairs.push((name.to_string(), value.to_string()));
    }

    /// Replace the first `name` entry and drop the others, or append
    pub fn set(&mut self, name: &str, value: &str) {
        match self.pairs.iter().position(|(n, _)| n == name) {
            Some(first) => {
                self.pairs[first].1 = value.to_string();
                let mut index = 0;
                self.pairs.retain(|(n, _)| {
                    let keep = n != name || index == first;
                    index += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.pairs.iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn delete(&mut self, name: &str) {
        self.pairs.retain(|(n, _)| n != name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.pairs.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for UrlSearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let serialized = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.pairs)
            .finish();
        f.write_str(&serialized)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlSearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let pairs = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { pairs }
    }
}

impl From<&FormData> for UrlSearchParams {
    fn from(form: &FormData) -> Self {
        form.iter().map(|(n, v)| (n, v.as_query_value())).collect()
    }
}
