//! Chunked cookie codec.
//!
//! Browsers cap individual cookies at ~4KB, but Veeam access/refresh token
//! blobs routinely exceed that. A logical value is therefore stored as
//! cookie `name` (first chunk) plus `name.1`, `name.2`, ... and reassembled
//! by walking the contiguous index run. The codec operates on a generic
//! mutable string store so it stays independent of any web framework's
//! cookie API.

use std::collections::HashMap;

/// Maximum characters per physical cookie value, leaving headroom for the
/// name and attributes under the 4096-byte browser ceiling.
pub const CHUNK_SIZE: usize = 3800;

/// Upper bound on indexed siblings considered by `delete_chunked`.
pub const MAX_CHUNKS: usize = 20;

/// Attributes applied identically to every chunk of a logical cookie.
#[derive(Debug, Clone)]
pub struct CookieAttributes {
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: &'static str,
    pub max_age_secs: Option<i64>,
}

impl CookieAttributes {
    /// Attributes used for persisted credential blobs.
    pub fn session() -> Self {
        Self {
            path: "/".to_string(),
            http_only: true,
            secure: false,
            same_site: "Lax",
            max_age_secs: Some(30 * 24 * 3600),
        }
    }
}

/// Minimal mutable view over a cookie transport.
pub trait CookieStore {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str, attrs: &CookieAttributes);
    fn remove(&mut self, name: &str, attrs: &CookieAttributes);
}

impl CookieStore for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }

    fn set(&mut self, name: &str, value: &str, _attrs: &CookieAttributes) {
        self.insert(name.to_string(), value.to_string());
    }

    fn remove(&mut self, name: &str, _attrs: &CookieAttributes) {
        HashMap::remove(self, name);
    }
}

/// Write `value` under `name`, chunking when it exceeds [`CHUNK_SIZE`].
///
/// The previous chunk set is deleted first so a shorter value never leaves
/// stale tail fragments behind. A value of exactly `CHUNK_SIZE` characters
/// still fits in a single cookie.
pub fn write_chunked(
    store: &mut dyn CookieStore,
    name: &str,
    value: &str,
    attrs: &CookieAttributes,
) {
    delete_chunked(store, name, attrs);

    if value.len() <= CHUNK_SIZE {
        store.set(name, value, attrs);
        return;
    }

    for (index, chunk) in split_chunks(value).into_iter().enumerate() {
        if index == 0 {
            store.set(name, chunk, attrs);
        } else {
            store.set(&format!("{}.{}", name, index), chunk, attrs);
        }
    }
}

/// Reassemble the logical value stored under `name`.
///
/// Returns `None` when the base cookie is absent. Reassembly stops at the
/// first missing index, so the value read is only as complete as the
/// contiguous chunk run found.
pub fn read_chunked(store: &dyn CookieStore, name: &str) -> Option<String> {
    let mut value = store.get(name)?;

    let mut index = 1;
    while let Some(part) = store.get(&format!("{}.{}", name, index)) {
        value.push_str(&part);
        index += 1;
    }

    Some(value)
}

/// Remove `name` and its indexed siblings. Idempotent for absent keys.
pub fn delete_chunked(store: &mut dyn CookieStore, name: &str, attrs: &CookieAttributes) {
    store.remove(name, attrs);
    for index in 1..MAX_CHUNKS {
        store.remove(&format!("{}.{}", name, index), attrs);
    }
}

/// Split on char boundaries into pieces of at most `CHUNK_SIZE` bytes.
fn split_chunks(value: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = value;

    while rest.len() > CHUNK_SIZE {
        let mut cut = CHUNK_SIZE;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }

    chunks.push(rest);
    chunks
}

/// Parse an inbound `Cookie` header into name/value pairs.
pub fn parse_cookie_header(raw: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for part in raw.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((name, value)) = part.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    cookies
}

fn render_set_cookie(name: &str, value: &str, attrs: &CookieAttributes) -> String {
    let mut header = format!("{}={}; Path={}", name, value, attrs.path);
    if let Some(max_age) = attrs.max_age_secs {
        header.push_str(&format!("; Max-Age={}", max_age));
    }
    header.push_str(&format!("; SameSite={}", attrs.same_site));
    if attrs.http_only {
        header.push_str("; HttpOnly");
    }
    if attrs.secure {
        header.push_str("; Secure");
    }
    header
}

fn render_removal(name: &str, attrs: &CookieAttributes) -> String {
    format!("{}=; Path={}; Max-Age=0", name, attrs.path)
}

/// Cookie store backed by the inbound request cookies that records every
/// mutation as a `Set-Cookie` header value for the outgoing response.
///
/// Removal headers are only emitted for cookies the client actually sent
/// (or that were set earlier in the same response), so chunk-set cleanup
/// does not flood responses with no-op expirations.
pub struct ResponseCookies {
    values: HashMap<String, String>,
    headers: Vec<String>,
}

impl ResponseCookies {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values,
            headers: Vec::new(),
        }
    }

    /// Rendered `Set-Cookie` header values accumulated so far.
    pub fn set_cookie_headers(&self) -> &[String] {
        &self.headers
    }
}

impl CookieStore for ResponseCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str, attrs: &CookieAttributes) {
        self.values.insert(name.to_string(), value.to_string());
        self.headers.push(render_set_cookie(name, value, attrs));
    }

    fn remove(&mut self, name: &str, attrs: &CookieAttributes) {
        if self.values.remove(name).is_some() {
            self.headers.push(render_removal(name, attrs));
        }
    }
}
