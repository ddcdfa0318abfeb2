//! Free-form header list carried alongside the parsed core fields.
//!
//! Core fields (From, To, Call-ID, CSeq, Via, ...) live on the message
//! structs. Everything else stays here in arrival order.

use serde::{Deserialize, Serialize};

/// A single header line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name as received
    pub name: String,
    /// Raw header value
    pub value: String,
}

impl Header {
    /// Create a new header
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Ordered header collection with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping existing ones with the same name
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// Replace all headers with this name by a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push(Header::new(name, value));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All values for `name` in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether at least one header with `name` exists
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every header with `name`, returning how many were removed
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }
}
