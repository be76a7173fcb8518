use crate::prelude::*;

/// Parsed CGI output: either a standard header block, or a full status
/// line when the script runs in NPH mode.
#[derive(Debug)]
pub struct CgiResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub nph: bool,
    local_redirect: Option<String>,
}

impl CgiResponse {
    /// Splits the accumulated stdout at the first blank line and parses
    /// the header block. Returns the status code to answer with when the
    /// output is unusable.
    pub fn parse(output: &[u8]) -> std::result::Result<CgiResponse, u16> {
        if output.is_empty() {
            return Err(HTTP_INTERNAL_SERVER_ERROR);
        }

        let (header_bytes, body) = match find_subsequence(output, b"\r\n\r\n") {
            Some(pos) => (&output[..pos], output[pos + 4..].to_vec()),
            None => match find_subsequence(output, b"\n\n") {
                Some(pos) => (&output[..pos], output[pos + 2..].to_vec()),
                // No separator at all: the whole output is the body.
                None => (&output[..0], output.to_vec()),
            },
        };

        let header_text = String::from_utf8_lossy(header_bytes).into_owned();
        let mut response = CgiResponse {
            status: HTTP_OK,
            reason: HttpResponse::status_text(HTTP_OK).to_string(),
            headers: Vec::new(),
            body,
            nph: false,
            local_redirect: None,
        };

        let mut lines = header_text.lines();

        if header_text.starts_with("HTTP/") {
            response.nph = true;
            let status_line = lines.next().unwrap_or("");
            response.parse_status_line(status_line)?;
        }

        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = match line.split_once(':') {
                Some((name, value)) => (name.trim().to_ascii_lowercase(), value.trim()),
                None => {
                    warn!("cgi: header line without ':' skipped: {}", line);
                    continue;
                }
            };
            if name.is_empty() {
                continue;
            }
            response.merge_header(name, value);
        }

        response.process_special_headers();
        Ok(response)
    }

    fn parse_status_line(&mut self, line: &str) -> std::result::Result<(), u16> {
        let mut parts = line.split_whitespace();
        let _version = parts.next().ok_or(HTTP_INTERNAL_SERVER_ERROR)?;
        let code = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .filter(|c| (100..=599).contains(c))
            .ok_or(HTTP_INTERNAL_SERVER_ERROR)?;

        self.status = code;
        let reason: Vec<&str> = parts.collect();
        self.reason = if reason.is_empty() {
            HttpResponse::status_text(code).to_string()
        } else {
            reason.join(" ")
        };
        Ok(())
    }

    /// Duplicate headers merge into a comma-joined value, except singleton
    /// names where the last one wins.
    fn merge_header(&mut self, name: String, value: &str) {
        if let Some(slot) = self.headers.iter_mut().find(|(k, _)| *k == name) {
            if SINGLETON_HEADERS.contains(&name.as_str()) {
                slot.1 = value.to_string();
            } else {
                slot.1 = format!("{}, {}", slot.1, value);
            }
        } else {
            self.headers.push((name, value.to_string()));
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| k != name);
    }

    /// `Status:` overrides the code; a `Location:` without explicit status
    /// either marks an internal redirect (local path) or defaults to 302.
    fn process_special_headers(&mut self) {
        if let Some(status_value) = self.header("status").map(|s| s.to_string()) {
            let mut parts = status_value.split_whitespace();
            if let Some(code) = parts.next().and_then(|c| c.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    self.status = code;
                    let reason: Vec<&str> = parts.collect();
                    self.reason = if reason.is_empty() {
                        HttpResponse::status_text(code).to_string()
                    } else {
                        reason.join(" ")
                    };
                }
            }
            self.remove_header("status");
        }

        if let Some(location) = self.header("location").map(|s| s.to_string()) {
            if self.status == HTTP_OK {
                if location.starts_with('/') && !location.contains("://") {
                    self.local_redirect = Some(location);
                } else {
                    self.status = HTTP_FOUND;
                    self.reason = HttpResponse::status_text(HTTP_FOUND).to_string();
                }
            }
        }
    }

    /// A local path the server should re-route on the same connection
    /// instead of answering with an HTTP redirect.
    pub fn internal_redirect(&self) -> Option<&str> {
        self.local_redirect.as_deref()
    }

    /// Builds the wire response. Content-Length always reflects the actual
    /// body; 204 and 304 never carry one.
    pub fn into_http_response(self) -> HttpResponse {
        let mut res = HttpResponse::new(self.status);
        res.reason = self.reason.clone();

        let mut saw_content_type = false;
        for (name, value) in &self.headers {
            if name == "content-length" {
                continue;
            }
            if name == "content-type" {
                saw_content_type = true;
            }
            res.set_header(name, value);
        }

        let suppress_body = matches!(self.status, HTTP_NO_CONTENT | HTTP_NOT_MODIFIED);
        if suppress_body {
            res.set_header("content-length", "0");
        } else {
            if !saw_content_type {
                res.set_header("content-type", "text/html");
            }
            let length = self.body.len().to_string();
            res.set_header("content-length", &length);
            res.body = self.body;
        }

        res
    }
}
