use crate::prelude::*;

/// How a response affects the connection. `FatalError` forces close after
/// the bytes flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    FatalError,
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub head_only: bool,
    pub severity: Severity,
    pub bytes_sent: usize,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        HttpResponse {
            status_code,
            reason: Self::status_text(status_code).to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            head_only: false,
            severity: Severity::Success,
            bytes_sent: 0,
        }
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            421 => "Misdirected Request",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    pub fn set_status(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.reason = Self::status_text(code).to_string();
        self
    }

    /// Replaces any existing header of the same name; names are kept in
    /// insertion order otherwise.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        let lower = name.to_ascii_lowercase();
        if let Some(slot) = self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&lower))
        {
            slot.1 = value.to_string();
        } else {
            self.headers.push((lower, value.to_string()));
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.set_header("content-length", &body.len().to_string());
        self.set_header("content-type", content_type);
        self.body = body;
        self
    }

    pub fn redirect(code: u16, target: &str) -> Self {
        let mut res = HttpResponse::new(code);
        res.set_header("location", target);
        res.set_header("content-length", "0");
        res
    }

    /// Builds an error response for `code`: the configured status page when
    /// one exists and is readable, the built-in HTML page otherwise.
    pub fn error(code: u16, cfg: Option<&ServerConfig>, mime: &MimeTable) -> Self {
        let mut res = HttpResponse::new(code);
        res.severity = match code {
            HTTP_BAD_REQUEST | HTTP_PAYLOAD_TOO_LARGE | HTTP_VERSION_NOT_SUPPORTED => {
                Severity::FatalError
            }
            _ => Severity::Error,
        };

        if let Some(cfg) = cfg {
            if let Some(page) = cfg.directives.status_path(code) {
                let path = if page.starts_with('/') && Path::new(page).is_file() {
                    PathBuf::from(page)
                } else {
                    let root = cfg.directives.root_path().unwrap_or(".");
                    Path::new(root).join(page.trim_start_matches('/'))
                };

                if let Ok(content) = fs::read(&path) {
                    let content_type = mime.resolve(&path).to_string();
                    res.set_body(content, &content_type);
                    return res;
                }
                warn!("status page {} for {} is unreadable", path.display(), code);
            }
        }

        let body = Self::default_status_body(code);
        res.set_body(body.into_bytes(), "text/html");
        res
    }

    /// Built-in status page used when no status_path is configured.
    pub fn default_status_body(code: u16) -> String {
        let reason = Self::status_text(code);
        format!(
            "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n\
             <body>\n<center><h1>{code} {reason}</h1></center>\n\
             <hr><center>{SERVER_SOFTWARE}</center>\n</body>\n</html>\n"
        )
    }

    /// Stamps the headers every response carries before serialization.
    pub fn finalize(&mut self, keep_alive: bool) {
        self.set_header("server", SERVER_SOFTWARE);
        self.set_header("date", &httpdate::fmt_http_date(SystemTime::now()));

        if self.header("content-length").is_none() {
            let len = self.body.len().to_string();
            self.set_header("content-length", &len);
        }

        let close = self.severity == Severity::FatalError || !keep_alive;
        self.set_header("connection", if close { "close" } else { "keep-alive" });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.reason).into_bytes();

        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", pascal_case(name), value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");

        if !self.head_only {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

fn pascal_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}
