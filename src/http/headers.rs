use crate::prelude::*;

/// Request header directives that must appear at most once. A duplicate is
/// a protocol error answered with 400.
pub const SINGLETON_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "content-location",
    "date",
    "etag",
    "expires",
    "last-modified",
    "location",
    "server",
    "user-agent",
    "referer",
    "authorization",
    "proxy-authorization",
    "expect",
    "upgrade",
    "retry-after",
    "content-range",
];

/// Header values in these directives arrive percent-encoded.
const DECODED_HEADERS: &[&str] = &["content-disposition", "referer", "location"];

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// One parsed header line: lowercased directive, comma-separated value
/// list, and any `;`-delimited `key=value` parameters.
#[derive(Debug, Clone)]
pub struct Header {
    pub name: String,
    pub raw_value: String,
    pub values: Vec<String>,
    pub params: Vec<(String, String)>,
}

impl Header {
    /// Parses `directive ":" OWS value ("," value)* (";" param "=" value)*`.
    /// Returns the status code to fail the request with on malformed input.
    pub fn parse(line: &str) -> std::result::Result<Header, u16> {
        let colon = line.find(':').ok_or(HTTP_BAD_REQUEST)?;
        let name = line[..colon].trim();

        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(HTTP_BAD_REQUEST);
        }

        let name = name.to_ascii_lowercase();
        let mut raw_value = line[colon + 1..].trim().to_string();

        if DECODED_HEADERS.contains(&name.as_str()) {
            raw_value = percent_decode(&raw_value);
        }

        let mut segments = raw_value.split(';');
        let value_list = segments.next().unwrap_or("");

        let values: Vec<String> = value_list
            .split(',')
            .map(|v| unquote(v.trim()).to_string())
            .filter(|v| !v.is_empty())
            .collect();

        let mut params = Vec::new();
        for segment in segments {
            if let Some((key, value)) = segment.split_once('=') {
                params.push((
                    key.trim().to_ascii_lowercase(),
                    unquote(value.trim()).to_string(),
                ));
            }
        }

        Ok(Header {
            name,
            raw_value,
            values,
            params,
        })
    }

    pub fn first_value(&self) -> &str {
        self.values.first().map(|v| v.as_str()).unwrap_or("")
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_value(&self, value: &str) -> bool {
        self.values.iter().any(|v| v.eq_ignore_ascii_case(value))
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Ordered header collection with singleton enforcement.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap::default()
    }

    pub fn add_line(&mut self, line: &str) -> std::result::Result<(), u16> {
        let header = Header::parse(line)?;

        if SINGLETON_HEADERS.contains(&header.name.as_str()) && self.contains(&header.name) {
            return Err(HTTP_BAD_REQUEST);
        }

        self.headers.push(header);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Header> {
        let lower = name.to_ascii_lowercase();
        self.headers.iter().find(|h| h.name == lower)
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|h| h.first_value())
    }

    pub fn raw_value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|h| h.raw_value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
    }
}
