use crate::prelude::*;
use crate::router::CgiPlan;

/// Assembles the CGI/1.1 meta-variable map for one invocation. The child
/// runs with exactly this environment.
pub fn build_env(
    req: &HttpRequest,
    cfg: &ServerConfig,
    plan: &CgiPlan,
    remote: &SocketAddr,
    port: u16,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());

    env.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    env.insert("REQUEST_URI".to_string(), req.raw_uri.clone());

    let script_name = plan.location_path.trim_end_matches('/');
    let script_name = if script_name.is_empty() { "/" } else { script_name };
    env.insert("SCRIPT_NAME".to_string(), script_name.to_string());

    let path_info = req
        .path
        .strip_prefix(script_name)
        .filter(|_| script_name != "/")
        .unwrap_or(&req.path);
    let path_info = if path_info.starts_with('/') {
        path_info.to_string()
    } else {
        format!("/{}", path_info)
    };
    env.insert("PATH_INFO".to_string(), path_info);

    env.insert(
        "SCRIPT_FILENAME".to_string(),
        plan.script.to_string_lossy().into_owned(),
    );
    env.insert("QUERY_STRING".to_string(), req.query.clone());

    env.insert(
        "CONTENT_TYPE".to_string(),
        req.headers
            .raw_value("content-type")
            .unwrap_or("")
            .to_string(),
    );
    env.insert("CONTENT_LENGTH".to_string(), req.body.len().to_string());

    env.insert("SERVER_NAME".to_string(), cfg.primary_name().to_string());
    env.insert("SERVER_PORT".to_string(), port.to_string());
    env.insert("REMOTE_ADDR".to_string(), remote.ip().to_string());
    env.insert("DOCUMENT_ROOT".to_string(), plan.document_root.clone());

    for header in req.headers.iter() {
        let key = format!("HTTP_{}", cgi_header_name(&header.name));
        env.entry(key).or_insert_with(|| header.first_value().to_string());
    }

    env
}

/// `X-Custom-Header` becomes `X_CUSTOM_HEADER`: hyphens to underscores,
/// uppercased, everything else non-alphanumeric stripped.
fn cgi_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '-' => out.push('_'),
            c if c.is_ascii_alphanumeric() => out.push(c.to_ascii_uppercase()),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> CgiPlan {
        CgiPlan {
            script: PathBuf::from("/usr/lib/cgi-bin/hello"),
            interpreter: None,
            location_path: "/cgi/".to_string(),
            document_root: "/srv".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    fn request(raw: &[u8]) -> HttpRequest {
        let mut req = HttpRequest::new();
        let mut buf = raw.to_vec();
        req.parse(&mut buf);
        req.body.set_limit(1024).unwrap();
        req.parse(&mut buf);
        req
    }

    fn test_cfg() -> ServerConfig {
        let mut cfg = ServerConfig::new();
        cfg.insert_server_name("example.com");
        cfg
    }

    #[test]
    fn test_core_meta_variables() {
        let req = request(
            b"POST /cgi/hello/extra?x=1&y=2 HTTP/1.1\r\nHost: example.com\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok",
        );
        let cfg = test_cfg();
        let remote: SocketAddr = "10.0.0.7:55555".parse().unwrap();
        let env = build_env(&req, &cfg, &plan(), &remote, 8080);

        assert_eq!(env["GATEWAY_INTERFACE"], "CGI/1.1");
        assert_eq!(env["SERVER_PROTOCOL"], "HTTP/1.1");
        assert_eq!(env["REQUEST_METHOD"], "POST");
        assert_eq!(env["REQUEST_URI"], "/cgi/hello/extra?x=1&y=2");
        assert_eq!(env["SCRIPT_NAME"], "/cgi");
        assert_eq!(env["PATH_INFO"], "/hello/extra");
        assert_eq!(env["SCRIPT_FILENAME"], "/usr/lib/cgi-bin/hello");
        assert_eq!(env["QUERY_STRING"], "x=1&y=2");
        assert_eq!(env["CONTENT_TYPE"], "text/plain");
        assert_eq!(env["CONTENT_LENGTH"], "2");
        assert_eq!(env["SERVER_NAME"], "example.com");
        assert_eq!(env["SERVER_PORT"], "8080");
        assert_eq!(env["REMOTE_ADDR"], "10.0.0.7");
        assert_eq!(env["DOCUMENT_ROOT"], "/srv");
    }

    #[test]
    fn test_request_headers_become_http_vars() {
        let req = request(
            b"POST /cgi/x HTTP/1.1\r\nHost: h\r\nX-Custom-Header: abc\r\nUser-Agent: tester\r\n\r\n",
        );
        let cfg = test_cfg();
        let remote: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let env = build_env(&req, &cfg, &plan(), &remote, 80);

        assert_eq!(env["HTTP_X_CUSTOM_HEADER"], "abc");
        assert_eq!(env["HTTP_USER_AGENT"], "tester");
        assert_eq!(env["HTTP_HOST"], "h");
    }

    #[test]
    fn test_header_name_mangling() {
        assert_eq!(cgi_header_name("x-custom-header"), "X_CUSTOM_HEADER");
        assert_eq!(cgi_header_name("weird!name"), "WEIRDNAME");
    }
}
