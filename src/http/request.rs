use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Delete,
    Put,
    Extension(String),
}

impl Method {
    /// Methods the handlers implement out of the box. The location
    /// allow-list narrows this further.
    pub const SUPPORTED: &'static [&'static str] = &["GET", "HEAD", "POST", "DELETE", "PUT"];

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Put => "PUT",
            Method::Extension(token) => token,
        }
    }
}

impl FromStr for Method {
    type Err = u16;

    /// Any RFC 7230 token is accepted; the allow-list decides later.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty()
            || !s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
        {
            return Err(HTTP_BAD_REQUEST);
        }
        Ok(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            "PUT" => Method::Put,
            other => Method::Extension(other.to_string()),
        })
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    ParsingUri,
    ParsingHeaders,
    ParsingBody,
    Complete,
    Error,
}

/// Incrementally parsed HTTP/1.1 request. Driven one buffer at a time:
/// each `parse` call consumes what it can from the holding buffer and
/// leaves the rest (possibly a pipelined next request) in place.
#[derive(Debug)]
pub struct HttpRequest {
    pub state: RequestState,
    pub method: Method,
    pub raw_uri: String,
    pub path: String,
    pub query: String,
    pub query_params: HashMap<String, Vec<String>>,
    pub version: String,
    pub headers: HeaderMap,
    pub body: Body,
    header_block_size: usize,
    error_code: u16,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            state: RequestState::ParsingUri,
            method: Method::Get,
            raw_uri: String::new(),
            path: String::new(),
            query: String::new(),
            query_params: HashMap::new(),
            version: String::new(),
            headers: HeaderMap::new(),
            body: Body::new(),
            header_block_size: 0,
            error_code: HTTP_BAD_REQUEST,
        }
    }

    pub fn reset(&mut self) {
        *self = HttpRequest::new();
    }

    /// Drives the three parser stages over the holding buffer. Returns
    /// `Incomplete` when more bytes (or the body size limit) are needed.
    pub fn parse(&mut self, buf: &mut Vec<u8>) -> ParseStatus {
        loop {
            let status = match self.state {
                RequestState::ParsingUri => self.parse_request_line(buf),
                RequestState::ParsingHeaders => self.parse_header_lines(buf),
                RequestState::ParsingBody => {
                    if !self.body.limit_is_set() {
                        // The connection resolves the virtual host first and
                        // installs client_max_body_size before body bytes flow.
                        return ParseStatus::Incomplete;
                    }
                    self.body.feed(buf)
                }
                RequestState::Complete => return ParseStatus::Complete,
                RequestState::Error => return ParseStatus::Failed(self.error_code),
            };

            match status {
                ParseStatus::Complete => match self.state {
                    RequestState::ParsingUri => self.state = RequestState::ParsingHeaders,
                    RequestState::ParsingHeaders => match self.finish_headers() {
                        Ok(RequestState::Complete) => {
                            self.state = RequestState::Complete;
                            return ParseStatus::Complete;
                        }
                        Ok(next) => self.state = next,
                        Err(code) => return self.fail(code),
                    },
                    RequestState::ParsingBody => {
                        self.state = RequestState::Complete;
                        return ParseStatus::Complete;
                    }
                    _ => return ParseStatus::Complete,
                },
                ParseStatus::Incomplete => return ParseStatus::Incomplete,
                ParseStatus::Failed(code) => return self.fail(code),
            }
        }
    }

    fn fail(&mut self, code: u16) -> ParseStatus {
        self.state = RequestState::Error;
        self.error_code = code;
        ParseStatus::Failed(code)
    }

    fn parse_request_line(&mut self, buf: &mut Vec<u8>) -> ParseStatus {
        let end = match find_crlf(buf, 0) {
            Some(end) => end,
            None => {
                if buf.len() > MAX_REQUEST_LINE {
                    return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
                }
                return ParseStatus::Incomplete;
            }
        };

        if end + 2 > MAX_REQUEST_LINE {
            return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
        }

        let line = match std::str::from_utf8(&buf[..end]) {
            Ok(line) => line.to_string(),
            Err(_) => return ParseStatus::Failed(HTTP_BAD_REQUEST),
        };
        buf.drain(..end + 2);

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return ParseStatus::Failed(HTTP_BAD_REQUEST);
        }

        self.method = match parts[0].parse() {
            Ok(method) => method,
            Err(code) => return ParseStatus::Failed(code),
        };

        if !parts[1].starts_with('/') {
            return ParseStatus::Failed(HTTP_BAD_REQUEST);
        }
        self.raw_uri = parts[1].to_string();

        if parts[2] != "HTTP/1.1" {
            if parts[2].starts_with("HTTP/") {
                return ParseStatus::Failed(HTTP_VERSION_NOT_SUPPORTED);
            }
            return ParseStatus::Failed(HTTP_BAD_REQUEST);
        }
        self.version = parts[2].to_string();

        ParseStatus::Complete
    }

    fn parse_header_lines(&mut self, buf: &mut Vec<u8>) -> ParseStatus {
        loop {
            let end = match find_crlf(buf, 0) {
                Some(end) => end,
                None => {
                    if buf.len() > MAX_HEADER_LINE {
                        return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
                    }
                    return ParseStatus::Incomplete;
                }
            };

            if end + 2 > MAX_HEADER_LINE {
                return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
            }

            self.header_block_size += end + 2;
            if self.header_block_size > MAX_HEADER_BLOCK {
                return ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE);
            }

            if end == 0 {
                buf.drain(..2);
                return ParseStatus::Complete;
            }

            let line = match std::str::from_utf8(&buf[..end]) {
                Ok(line) => line.to_string(),
                Err(_) => return ParseStatus::Failed(HTTP_BAD_REQUEST),
            };
            buf.drain(..end + 2);

            if let Err(code) = self.headers.add_line(&line) {
                return ParseStatus::Failed(code);
            }
        }
    }

    /// Validates the header block and decides the body mode. Runs once,
    /// between the header stage and the body stage.
    fn finish_headers(&mut self) -> std::result::Result<RequestState, u16> {
        if !self.headers.contains("host") {
            return Err(HTTP_BAD_REQUEST);
        }

        let has_length = self.headers.contains("content-length");
        let transfer_encoding = self.headers.get("transfer-encoding");

        if has_length && transfer_encoding.is_some() {
            return Err(HTTP_BAD_REQUEST);
        }

        let chunked = match transfer_encoding {
            Some(te) => {
                if !te.values.iter().all(|v| v.eq_ignore_ascii_case("chunked")) {
                    return Err(HTTP_BAD_REQUEST);
                }
                true
            }
            None => false,
        };

        let content_length = if has_length {
            let raw = self.headers.first_value("content-length").unwrap_or("");
            match raw.parse::<usize>() {
                Ok(n) => n,
                Err(_) => return Err(HTTP_BAD_REQUEST),
            }
        } else {
            0
        };

        self.split_uri();

        if chunked {
            self.body.set_kind(BodyKind::Chunked);
            Ok(RequestState::ParsingBody)
        } else if content_length > 0 {
            self.body.set_kind(BodyKind::ContentLength(content_length));
            Ok(RequestState::ParsingBody)
        } else {
            self.body.set_kind(BodyKind::None);
            Ok(RequestState::Complete)
        }
    }

    /// Splits the raw URI on the first `?`, percent-decodes both halves,
    /// and expands the query into its multi-map.
    fn split_uri(&mut self) {
        let (path, query) = match self.raw_uri.split_once('?') {
            Some((p, q)) => (p, q),
            None => (self.raw_uri.as_str(), ""),
        };

        self.path = percent_decode(path);
        self.query = query.to_string();

        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (percent_decode(k), percent_decode(v)),
                None => (percent_decode(pair), String::new()),
            };
            self.query_params.entry(key).or_default().push(value);
        }
    }

    /// Repoints the request at a new local target, used when a CGI script
    /// answers with an internal redirect.
    pub fn rewrite_target(&mut self, new_uri: &str) {
        self.raw_uri = new_uri.to_string();
        self.query_params.clear();
        self.split_uri();
    }

    /// HTTP/1.1 defaults to keep-alive; an explicit `Connection: close`
    /// from the client wins.
    pub fn wants_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(header) => !header.has_value("close"),
            None => true,
        }
    }
}
