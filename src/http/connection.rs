use crate::cgi::CgiDriver;
use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    WaitingForInput,
    Processing,
    WaitingForOutput,
    Disconnected,
}

/// One accepted client socket and everything in flight on it: the holding
/// buffer, the request being parsed, the FIFO of responses waiting to go
/// out, and any CGI child currently producing the next response.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub remote_addr: SocketAddr,
    pub local_port: u16,
    pub server_list: Vec<Arc<ServerConfig>>,
    pub s_cfg: Option<Arc<ServerConfig>>,
    pub mime: Arc<MimeTable>,
    pub holding: Vec<u8>,
    pub request: HttpRequest,
    pub responses: VecDeque<HttpResponse>,
    pub sending: Option<HttpResponse>,
    pub write_buffer: Vec<u8>,
    pub state: ConnState,
    pub keep_alive: bool,
    pub close_after_flush: bool,
    pub peer_closed: bool,
    pub last_activity: Instant,
    pub cgi: Option<CgiDriver>,
    pub redirect_depth: usize,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        local_port: u16,
        server_list: Vec<Arc<ServerConfig>>,
        mime: Arc<MimeTable>,
    ) -> Self {
        Connection {
            stream,
            remote_addr,
            local_port,
            server_list,
            s_cfg: None,
            mime,
            holding: Vec::with_capacity(READ_BUF_SIZE),
            request: HttpRequest::new(),
            responses: VecDeque::new(),
            sending: None,
            write_buffer: Vec::new(),
            state: ConnState::WaitingForInput,
            keep_alive: true,
            close_after_flush: false,
            peer_closed: false,
            last_activity: Instant::now(),
            cgi: None,
            redirect_depth: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// The holding buffer may carry at most the header ceiling plus the
    /// effective body limit; bytes past that are a payload violation.
    fn holding_cap(&self) -> usize {
        let body_limit = self
            .s_cfg
            .as_ref()
            .map(|cfg| cfg.directives.client_max_body_size())
            .unwrap_or(DEFAULT_CLIENT_MAX_BODY_SIZE);
        MAX_HEADER_BLOCK + body_limit + READ_BUF_SIZE
    }

    /// Drains the socket into the holding buffer. Returns `Ok(true)` on
    /// EOF from the peer.
    pub fn read_data(&mut self) -> std::result::Result<bool, u16> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    self.holding.extend_from_slice(&buf[..n]);
                    if self.holding.len() > self.holding_cap() {
                        return Err(HTTP_PAYLOAD_TOO_LARGE);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Ok(true),
            }
        }
    }

    /// Virtual-host selection from the Host header, against this
    /// listener's server list. Falls back to the first server.
    pub fn resolve_server(&mut self) -> Arc<ServerConfig> {
        if let Some(cfg) = &self.s_cfg {
            return Arc::clone(cfg);
        }

        let selected = match self.request.headers.first_value("host") {
            Some(host) => {
                let (name, port) = match host.rsplit_once(':') {
                    Some((n, p)) => (n, p.parse::<u16>().ok()),
                    None => (host, None),
                };

                if port.is_some() && port != Some(self.local_port) {
                    Arc::clone(&self.server_list[0])
                } else {
                    self.server_list
                        .iter()
                        .find(|s| s.has_server_name(name))
                        .cloned()
                        .unwrap_or_else(|| Arc::clone(&self.server_list[0]))
                }
            }
            None => Arc::clone(&self.server_list[0]),
        };

        self.s_cfg = Some(Arc::clone(&selected));
        selected
    }

    /// Finalizes and queues a response; keep-alive gating happens here so
    /// every queued response carries its Connection header.
    pub fn enqueue_response(&mut self, mut response: HttpResponse) {
        let server_allows = self
            .s_cfg
            .as_ref()
            .map(|cfg| cfg.directives.keep_alive())
            .unwrap_or(DEFAULT_KEEP_ALIVE);

        self.keep_alive = server_allows && self.request.wants_keep_alive();
        if response.severity == Severity::FatalError {
            self.keep_alive = false;
        }

        if self.request.method == Method::Head {
            response.head_only = true;
        }

        response.finalize(self.keep_alive);
        self.responses.push_back(response);
        self.state = ConnState::WaitingForOutput;
    }

    /// Moves queued responses through the socket. Returns `Ok(false)` when
    /// the connection should be torn down.
    pub fn flush_output(&mut self) -> std::result::Result<(), ()> {
        loop {
            if self.write_buffer.is_empty() {
                if let Some(finished) = self.sending.take() {
                    let wants_close = finished.header("connection") == Some("close");
                    if finished.severity == Severity::FatalError || wants_close {
                        self.close_after_flush = true;
                    }
                }

                if self.close_after_flush {
                    return Err(());
                }

                match self.responses.pop_front() {
                    Some(response) => {
                        self.write_buffer = response.to_bytes();
                        self.sending = Some(response);
                    }
                    None => {
                        if self.cgi.is_none() && self.state == ConnState::WaitingForOutput {
                            self.state = ConnState::WaitingForInput;
                        }
                        return Ok(());
                    }
                }
            }

            match self.stream.write(&self.write_buffer) {
                Ok(0) => return Err(()),
                Ok(n) => {
                    self.write_buffer.drain(..n);
                    if let Some(sending) = &mut self.sending {
                        sending.bytes_sent += n;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Err(()),
            }
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buffer.is_empty() || !self.responses.is_empty() || self.sending.is_some()
    }

    pub fn desired_interest(&self) -> Interest {
        if self.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Resets per-request state for the next request on this connection.
    /// The holding buffer survives: it may already contain a pipelined
    /// request.
    pub fn finish_request(&mut self) {
        self.request.reset();
        self.s_cfg = None;
        self.redirect_depth = 0;
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
