use std::fs;
use tempfile::TempDir;
use webserv::config::{resolve, ConfigAst};
use webserv::http::{HttpRequest, HttpResponse, ParseStatus};
use webserv::mime::MimeTable;
use webserv::prelude::*;
use webserv::router::{dispatch, Dispatch};

fn server_for(root: &TempDir, extra: &str) -> Arc<ServerConfig> {
    let config = format!(
        "server {{ listen 127.0.0.1:8080; server_name localhost; root {}; {} }}",
        root.path().display(),
        extra
    );
    let servers = resolve(ConfigAst::parse(&config).unwrap());
    assert_eq!(servers.len(), 1);
    Arc::clone(&servers[0])
}

fn request(raw: &str) -> HttpRequest {
    let mut req = HttpRequest::new();
    let mut buf = raw.as_bytes().to_vec();
    let status = req.parse(&mut buf);
    if status == ParseStatus::Incomplete {
        req.body.set_limit(1024 * 1024).unwrap();
        req.parse(&mut buf);
    }
    req
}

fn respond(dispatched: Dispatch) -> HttpResponse {
    match dispatched {
        Dispatch::Respond(res) => res,
        Dispatch::StartCgi(plan) => panic!("unexpected CGI dispatch: {:?}", plan),
    }
}

#[test]
fn test_static_get_dispatch() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("index.html"), "hello").unwrap();
    let cfg = server_for(&root, "index index.html;");
    let mime = MimeTable::load();

    let req = request("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));

    assert_eq!(res.status_code, HTTP_OK);
    assert_eq!(res.body, b"hello");
    assert_eq!(res.header("content-type"), Some("text/html"));
}

#[test]
fn test_no_matching_location_is_404() {
    let root = TempDir::new().unwrap();
    // No server-level root: only /api/ exists as a location.
    let config = format!(
        "server {{ listen 8080; server_name a; location /api/ {{ root {}; }} }}",
        root.path().display()
    );
    let servers = resolve(ConfigAst::parse(&config).unwrap());
    let mime = MimeTable::load();

    let req = request("GET /other HTTP/1.1\r\nHost: a\r\n\r\n");
    let res = respond(dispatch(&req, &servers[0], &mime));
    assert_eq!(res.status_code, HTTP_NOT_FOUND);
}

#[test]
fn test_method_not_allowed_lists_allow() {
    let root = TempDir::new().unwrap();
    let cfg = server_for(
        &root,
        "location /ro/ { allowed_methods GET HEAD; root /tmp; }",
    );
    let mime = MimeTable::load();

    let req = request("DELETE /ro/file HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));

    assert_eq!(res.status_code, HTTP_METHOD_NOT_ALLOWED);
    let allow = res.header("allow").unwrap();
    assert!(allow.contains("GET"));
    assert!(allow.contains("HEAD"));
    assert!(!allow.contains("DELETE"));
}

#[test]
fn test_redirect_short_circuit() {
    let root = TempDir::new().unwrap();
    let cfg = server_for(&root, "location /old/ { redirect 301 /new/; }");
    let mime = MimeTable::load();

    let req = request("GET /old/page HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));

    assert_eq!(res.status_code, 301);
    assert_eq!(res.header("location"), Some("/new/"));
}

#[test]
fn test_traversal_is_rejected() {
    let root = TempDir::new().unwrap();
    let cfg = server_for(&root, "");
    let mime = MimeTable::load();

    let req = request("GET /../etc/passwd HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));
    assert_eq!(res.status_code, HTTP_FORBIDDEN);
}

#[test]
fn test_percent_encoded_traversal_is_rejected() {
    let root = TempDir::new().unwrap();
    let cfg = server_for(&root, "");
    let mime = MimeTable::load();

    let req = request("GET /%2e%2e/etc/passwd HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));
    assert_eq!(res.status_code, HTTP_FORBIDDEN);
}

#[test]
fn test_unimplemented_method_is_501() {
    let root = TempDir::new().unwrap();
    let cfg = server_for(&root, "allowed_methods GET PATCH;");
    let mime = MimeTable::load();

    let req = request("PATCH / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));
    assert_eq!(res.status_code, HTTP_NOT_IMPLEMENTED);
}

#[test]
fn test_cgi_dispatch_for_post() {
    let root = TempDir::new().unwrap();
    let cgi_dir = TempDir::new().unwrap();
    fs::write(cgi_dir.path().join("hello"), "#!/bin/sh\necho\n").unwrap();

    let cfg = server_for(
        &root,
        &format!(
            "location /cgi/ {{ cgi_path {}; root {}; }}",
            cgi_dir.path().display(),
            root.path().display()
        ),
    );
    let mime = MimeTable::load();

    let req = request("POST /cgi/hello HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
    match dispatch(&req, &cfg, &mime) {
        Dispatch::StartCgi(plan) => {
            assert_eq!(plan.script, cgi_dir.path().join("hello"));
            assert!(plan.interpreter.is_none());
            assert_eq!(plan.location_path, "/cgi/");
        }
        Dispatch::Respond(res) => panic!("expected CGI dispatch, got {}", res.status_code),
    }
}

#[test]
fn test_missing_cgi_script_is_404() {
    let root = TempDir::new().unwrap();
    let cgi_dir = TempDir::new().unwrap();
    let cfg = server_for(
        &root,
        &format!("location /cgi/ {{ cgi_path {}; }}", cgi_dir.path().display()),
    );
    let mime = MimeTable::load();

    let req = request("POST /cgi/nothing HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");
    let res = respond(dispatch(&req, &cfg, &mime));
    assert_eq!(res.status_code, HTTP_NOT_FOUND);
}
