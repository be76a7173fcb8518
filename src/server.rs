use crate::cgi::{self, CgiDriver, CgiResponse};
use crate::prelude::*;
use crate::router::{self, CgiPlan, Dispatch};
use std::process::Child;

/// One bound, non-blocking listening socket and the ordered list of
/// virtual hosts that share its address.
#[derive(Debug)]
pub struct Listener {
    pub socket: TcpListener,
    pub servers: Vec<Arc<ServerConfig>>,
    pub port: u16,
}

/// The readiness-driven core: owns every listener and connection
/// descriptor, dispatches accept/read/write events, pumps CGI pipes, and
/// sweeps timeouts. Single-threaded and cooperative; nothing here blocks
/// beyond one syscall.
pub struct Server {
    listeners: HashMap<Token, Listener>,
    connections: HashMap<Token, Connection>,
    cgi_to_client: HashMap<Token, Token>,
    zombies: Vec<Child>,
    next_token: usize,
    mime: Arc<MimeTable>,
}

impl Server {
    /// Binds every distinct configured address. Bind failures are fatal:
    /// the process has nothing to serve.
    pub fn new(configs: Vec<Arc<ServerConfig>>, poll: &Poll) -> Result<Server> {
        if configs.is_empty() {
            return Err(ServerError::from("no usable server configuration"));
        }

        let mut by_addr: Vec<(SocketAddr, Vec<Arc<ServerConfig>>)> = Vec::new();
        for cfg in &configs {
            for addr in cfg.socket_addresses() {
                match by_addr.iter_mut().find(|(a, _)| a == addr) {
                    Some((_, list)) => list.push(Arc::clone(cfg)),
                    None => by_addr.push((*addr, vec![Arc::clone(cfg)])),
                }
            }
        }

        let mut listeners = HashMap::new();
        let mut next_token = 0;

        for (addr, servers) in by_addr {
            let mut socket = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut socket, token, Interest::READABLE)?;
            info!(
                "listening on {} ({} virtual host{})",
                addr,
                servers.len(),
                if servers.len() == 1 { "" } else { "s" }
            );
            listeners.insert(
                token,
                Listener {
                    socket,
                    servers,
                    port: addr.port(),
                },
            );
        }

        Ok(Server {
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            zombies: Vec::new(),
            next_token,
            mime: Arc::new(MimeTable::load()),
        })
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            let timeout = self.next_timeout();
            poll.poll(&mut events, timeout)?;

            for event in events.iter() {
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_clients(&poll, token);
                } else if self.cgi_to_client.contains_key(&token) {
                    self.handle_cgi_event(&poll, token, event);
                } else if self.connections.contains_key(&token) {
                    self.handle_client_event(&poll, token, event);
                }
            }

            self.sweep(&poll);
        }
    }

    /// The wait interval is the smallest remaining idle or CGI budget
    /// across all connections.
    fn next_timeout(&self) -> Option<Duration> {
        let mut shortest: Option<Duration> = None;

        for conn in self.connections.values() {
            let idle_left = IDLE_TIMEOUT.saturating_sub(conn.idle_for());
            shortest = Some(shortest.map_or(idle_left, |s| s.min(idle_left)));

            if let Some(driver) = &conn.cgi {
                let cgi_left = driver.timeout.saturating_sub(driver.started.elapsed());
                shortest = Some(shortest.map_or(cgi_left, |s| s.min(cgi_left)));
            }
        }

        shortest.or(Some(IDLE_TIMEOUT))
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn accept_clients(&mut self, poll: &Poll, token: Token) {
        loop {
            let accepted = {
                let listener = match self.listeners.get(&token) {
                    Some(listener) => listener,
                    None => return,
                };
                match listener.socket.accept() {
                    Ok((stream, addr)) => (stream, addr, listener.port, listener.servers.clone()),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => return,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        return;
                    }
                }
            };
            let (mut stream, addr, port, servers) = accepted;

            let client_token = self.allocate_token();
            if poll
                .registry()
                .register(&mut stream, client_token, Interest::READABLE)
                .is_err()
            {
                continue;
            }

            debug!("accepted {} on port {}", addr, port);
            self.connections.insert(
                client_token,
                Connection::new(stream, addr, port, servers, Arc::clone(&self.mime)),
            );
        }
    }

    fn handle_client_event(&mut self, poll: &Poll, token: Token, event: &Event) {
        let mut drop_conn = false;

        {
            let Server {
                connections,
                cgi_to_client,
                next_token,
                ..
            } = self;
            let conn = match connections.get_mut(&token) {
                Some(conn) => conn,
                None => return,
            };
            conn.touch();

            if event.is_error() {
                drop_conn = true;
            } else {
                if event.is_readable() || event.is_read_closed() {
                    match conn.read_data() {
                        Ok(eof) => conn.peer_closed = conn.peer_closed || eof,
                        Err(code) => {
                            let res = HttpResponse::error(code, conn.s_cfg.as_deref(), &conn.mime);
                            conn.enqueue_response(res);
                            conn.holding.clear();
                        }
                    }
                    drive_connection(conn, poll, token, next_token, cgi_to_client);
                }

                if event.is_writable() && conn.flush_output().is_err() {
                    drop_conn = true;
                }

                if !drop_conn {
                    // A pipelined request may already sit in the holding
                    // buffer after the response went out.
                    drive_connection(conn, poll, token, next_token, cgi_to_client);

                    if conn.peer_closed && !conn.has_pending_output() && conn.cgi.is_none() {
                        drop_conn = true;
                    } else {
                        let interest = conn.desired_interest();
                        let _ = poll.registry().reregister(
                            &mut conn.stream,
                            token,
                            interest,
                        );
                    }
                }
            }
        }

        if drop_conn {
            self.drop_connection(poll, token);
        }
    }

    fn handle_cgi_event(&mut self, poll: &Poll, cgi_token: Token, event: &Event) {
        let client_token = match self.cgi_to_client.get(&cgi_token) {
            Some(token) => *token,
            None => return,
        };

        let Server {
            connections,
            cgi_to_client,
            zombies,
            next_token,
            ..
        } = self;

        let conn = match connections.get_mut(&client_token) {
            Some(conn) => conn,
            None => {
                cgi_to_client.remove(&cgi_token);
                return;
            }
        };
        conn.touch();

        let mut output_overflow = false;
        {
            let driver = match &mut conn.cgi {
                Some(driver) => driver,
                None => {
                    cgi_to_client.remove(&cgi_token);
                    return;
                }
            };

            if driver.stdin_token == Some(cgi_token) && (event.is_writable() || event.is_error()) {
                let done = driver.pump_stdin().unwrap_or(true);
                if done {
                    if let Some(mut stdin) = driver.stdin.take() {
                        let _ = poll.registry().deregister(&mut stdin);
                    }
                    if let Some(token) = driver.stdin_token.take() {
                        cgi_to_client.remove(&token);
                    }
                    trace!("cgi stdin closed, child sees EOF");
                }
            }

            if driver.stdout_token == Some(cgi_token)
                && (event.is_readable() || event.is_read_closed())
            {
                match driver.pump_stdout() {
                    Ok(true) => {
                        if let Some(mut stdout) = driver.stdout.take() {
                            let _ = poll.registry().deregister(&mut stdout);
                        }
                        if let Some(token) = driver.stdout_token.take() {
                            cgi_to_client.remove(&token);
                        }
                    }
                    Ok(false) => {}
                    Err(_) => output_overflow = true,
                }
            }

            if driver.stderr_token == Some(cgi_token)
                && (event.is_readable() || event.is_read_closed())
            {
                if driver.pump_stderr().unwrap_or(true) {
                    if let Some(mut stderr) = driver.stderr.take() {
                        let _ = poll.registry().deregister(&mut stderr);
                    }
                    if let Some(token) = driver.stderr_token.take() {
                        cgi_to_client.remove(&token);
                    }
                }
            }
        }

        if output_overflow {
            warn!("cgi output exceeded {} bytes, killing child", MAX_CGI_OUTPUT);
            abort_cgi(conn, poll, cgi_to_client, zombies, HTTP_INTERNAL_SERVER_ERROR);
        } else if conn.cgi.as_ref().is_some_and(|d| d.output_closed()) {
            finalize_cgi(conn, poll, client_token, next_token, cgi_to_client, zombies);
        }

        let interest = conn.desired_interest();
        let _ = poll
            .registry()
            .reregister(&mut conn.stream, client_token, interest);
    }

    /// Timer work: reap zombie children, kill overdue CGI children, drop
    /// idle connections.
    fn sweep(&mut self, poll: &Poll) {
        self.zombies
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));

        let overdue: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.cgi.as_ref().is_some_and(|d| d.timed_out()))
            .map(|(token, _)| *token)
            .collect();

        for token in overdue {
            let Server {
                connections,
                cgi_to_client,
                zombies,
                ..
            } = self;
            if let Some(conn) = connections.get_mut(&token) {
                warn!("cgi timed out for {}", conn.remote_addr);
                abort_cgi(conn, poll, cgi_to_client, zombies, HTTP_GATEWAY_TIMEOUT);
                let interest = conn.desired_interest();
                let _ = poll
                    .registry()
                    .reregister(&mut conn.stream, token, interest);
            }
        }

        let idle: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.idle_for() > IDLE_TIMEOUT)
            .map(|(token, _)| *token)
            .collect();

        for token in idle {
            debug!("idle timeout");
            self.drop_connection(poll, token);
        }
    }

    fn drop_connection(&mut self, poll: &Poll, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            conn.state = ConnState::Disconnected;
            let _ = poll.registry().deregister(&mut conn.stream);

            if let Some(mut driver) = conn.cgi.take() {
                driver.kill();
                teardown_driver(&mut driver, poll, &mut self.cgi_to_client);
                match driver.child.try_wait() {
                    Ok(Some(_)) => {}
                    _ => self.zombies.push(driver.child),
                }
            }

            trace!("connection {} closed", conn.remote_addr);
        }
    }
}

/// Runs the parser over whatever sits in the holding buffer and processes
/// every request that completes. Parsing pauses while a CGI child owns the
/// response slot; responses always leave in request order.
fn drive_connection(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
) {
    if conn.cgi.is_some() {
        return;
    }

    loop {
        match conn.request.parse(&mut conn.holding) {
            ParseStatus::Incomplete => {
                if conn.request.state == RequestState::ParsingBody
                    && !conn.request.body.limit_is_set()
                {
                    // Headers are in: pick the virtual host, apply the
                    // matched location's body ceiling, then keep feeding
                    // the body.
                    let cfg = conn.resolve_server();
                    let limit = cfg
                        .find_location(&conn.request.path)
                        .map(|l| l.directives.client_max_body_size())
                        .unwrap_or_else(|| cfg.directives.client_max_body_size());
                    if let Err(code) = conn.request.body.set_limit(limit) {
                        let res = HttpResponse::error(code, conn.s_cfg.as_deref(), &conn.mime);
                        conn.enqueue_response(res);
                        conn.holding.clear();
                        conn.finish_request();
                        return;
                    }
                    continue;
                }
                if conn.state == ConnState::WaitingForOutput && !conn.has_pending_output() {
                    conn.state = ConnState::WaitingForInput;
                }
                return;
            }
            ParseStatus::Complete => {
                conn.state = ConnState::Processing;
                let cfg = conn.resolve_server();

                match router::dispatch(&conn.request, &cfg, &conn.mime) {
                    Dispatch::Respond(res) => {
                        info!(
                            "{} {} -> {} {}",
                            conn.request.method, conn.request.raw_uri, res.status_code, res.reason
                        );
                        conn.enqueue_response(res);
                        conn.finish_request();
                        // Loop again: the holding buffer may hold a
                        // pipelined next request.
                    }
                    Dispatch::StartCgi(plan) => {
                        start_cgi(conn, poll, client_token, next_token, cgi_to_client, plan, &cfg);
                        return;
                    }
                }
            }
            ParseStatus::Failed(code) => {
                warn!(
                    "malformed request from {} ({})",
                    conn.remote_addr, code
                );
                let res = HttpResponse::error(code, conn.s_cfg.as_deref(), &conn.mime);
                conn.enqueue_response(res);
                conn.holding.clear();
                conn.finish_request();
                return;
            }
        }
    }
}

/// Spawns the CGI child and registers its pipes with the poller. The
/// connection suspends response production until the child completes or
/// times out.
fn start_cgi(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    plan: CgiPlan,
    cfg: &Arc<ServerConfig>,
) {
    let env = cgi::build_env(&conn.request, cfg, &plan, &conn.remote_addr, conn.local_port);

    let mut driver = match CgiDriver::spawn(&plan, &env, &conn.request.body) {
        Ok(driver) => driver,
        Err(e) => {
            warn!("cgi spawn for {} failed: {}", plan.script.display(), e);
            let code = match e.kind() {
                ErrorKind::NotFound => HTTP_NOT_FOUND,
                ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                _ => HTTP_INTERNAL_SERVER_ERROR,
            };
            let res = HttpResponse::error(code, Some(cfg), &conn.mime);
            conn.enqueue_response(res);
            conn.finish_request();
            return;
        }
    };

    let mut alloc = || {
        let token = Token(*next_token);
        *next_token += 1;
        token
    };

    if driver.has_input() {
        let token = alloc();
        if let Some(stdin) = &mut driver.stdin {
            if poll
                .registry()
                .register(stdin, token, Interest::WRITABLE)
                .is_ok()
            {
                driver.stdin_token = Some(token);
                cgi_to_client.insert(token, client_token);
            }
        }
    } else {
        // Nothing to send: close our end now so the child sees EOF.
        driver.stdin = None;
    }

    let token = alloc();
    if let Some(stdout) = &mut driver.stdout {
        if poll
            .registry()
            .register(stdout, token, Interest::READABLE)
            .is_ok()
        {
            driver.stdout_token = Some(token);
            cgi_to_client.insert(token, client_token);
        }
    }

    let token = alloc();
    if let Some(stderr) = &mut driver.stderr {
        if poll
            .registry()
            .register(stderr, token, Interest::READABLE)
            .is_ok()
        {
            driver.stderr_token = Some(token);
            cgi_to_client.insert(token, client_token);
        }
    }

    conn.state = ConnState::Processing;
    conn.cgi = Some(driver);
}

/// Deregisters and closes every parent-side pipe of a driver and clears
/// its token mappings.
fn teardown_driver(
    driver: &mut CgiDriver,
    poll: &Poll,
    cgi_to_client: &mut HashMap<Token, Token>,
) {
    if let Some(mut stdin) = driver.stdin.take() {
        let _ = poll.registry().deregister(&mut stdin);
    }
    if let Some(mut stdout) = driver.stdout.take() {
        let _ = poll.registry().deregister(&mut stdout);
    }
    if let Some(mut stderr) = driver.stderr.take() {
        let _ = poll.registry().deregister(&mut stderr);
    }
    for token in [
        driver.stdin_token.take(),
        driver.stdout_token.take(),
        driver.stderr_token.take(),
    ]
    .into_iter()
    .flatten()
    {
        cgi_to_client.remove(&token);
    }
}

/// Kills a misbehaving child and answers with `code`.
fn abort_cgi(
    conn: &mut Connection,
    poll: &Poll,
    cgi_to_client: &mut HashMap<Token, Token>,
    zombies: &mut Vec<Child>,
    code: u16,
) {
    if let Some(mut driver) = conn.cgi.take() {
        driver.kill();
        teardown_driver(&mut driver, poll, cgi_to_client);
        match driver.child.try_wait() {
            Ok(Some(_)) => {}
            _ => zombies.push(driver.child),
        }
    }

    let res = HttpResponse::error(code, conn.s_cfg.as_deref(), &conn.mime);
    conn.enqueue_response(res);
    conn.finish_request();
}

/// Both output pipes hit EOF: reap the child, re-parse its stdout into a
/// response, and either enqueue it or follow an internal redirect.
fn finalize_cgi(
    conn: &mut Connection,
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    zombies: &mut Vec<Child>,
) {
    let mut driver = match conn.cgi.take() {
        Some(driver) => driver,
        None => return,
    };
    teardown_driver(&mut driver, poll, cgi_to_client);

    let mut signaled = false;
    match driver.child.try_wait() {
        Ok(Some(status)) => {
            use std::os::unix::process::ExitStatusExt;
            signaled = status.signal().is_some();
            if let Some(code) = status.code() {
                if code != 0 {
                    warn!("cgi exited with code {}", code);
                }
            }
        }
        Ok(None) => {
            // Output is closed but the child lingers; force it down.
            let _ = driver.child.kill();
            let _ = driver.child.wait();
        }
        Err(_) => {}
    }

    if !driver.errors.is_empty() {
        warn!(
            "cgi stderr: {}",
            String::from_utf8_lossy(&driver.errors).trim_end()
        );
    }

    if signaled {
        warn!("cgi child terminated by signal");
        let res = HttpResponse::error(
            HTTP_INTERNAL_SERVER_ERROR,
            conn.s_cfg.as_deref(),
            &conn.mime,
        );
        conn.enqueue_response(res);
        conn.finish_request();
        return;
    }

    let parsed = match CgiResponse::parse(&driver.output) {
        Ok(parsed) => parsed,
        Err(code) => {
            let res = HttpResponse::error(code, conn.s_cfg.as_deref(), &conn.mime);
            conn.enqueue_response(res);
            conn.finish_request();
            return;
        }
    };

    if let Some(target) = parsed.internal_redirect().map(|t| t.to_string()) {
        conn.redirect_depth += 1;
        if conn.redirect_depth > MAX_INTERNAL_REDIRECTS {
            warn!("cgi internal redirect loop broken at {}", conn.redirect_depth);
            let res = HttpResponse::error(
                HTTP_INTERNAL_SERVER_ERROR,
                conn.s_cfg.as_deref(),
                &conn.mime,
            );
            conn.enqueue_response(res);
            conn.finish_request();
            return;
        }

        debug!("cgi internal redirect to {}", target);
        conn.request.rewrite_target(&target);
        // The body went to the first child; the rerouted request is a GET.
        conn.request.method = Method::Get;
        let cfg = conn.resolve_server();

        match router::dispatch(&conn.request, &cfg, &conn.mime) {
            Dispatch::Respond(res) => {
                conn.enqueue_response(res);
                conn.finish_request();
            }
            Dispatch::StartCgi(plan) => {
                start_cgi(conn, poll, client_token, next_token, cgi_to_client, plan, &cfg);
            }
        }
        return;
    }

    let res = parsed.into_http_response();
    info!(
        "{} {} -> {} {} (cgi)",
        conn.request.method, conn.request.raw_uri, res.status_code, res.reason
    );
    conn.enqueue_response(res);
    conn.finish_request();
}
