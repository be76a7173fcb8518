use webserv::http::*;
use webserv::prelude::{HTTP_BAD_REQUEST, HTTP_PAYLOAD_TOO_LARGE};

#[test]
fn test_simple_get_request() {
    let mut req = HttpRequest::new();
    let mut buf = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n".to_vec();

    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.path, "/index.html");
    assert_eq!(req.state, RequestState::Complete);
    assert_eq!(req.headers.first_value("host"), Some("localhost"));
}

#[test]
fn test_fragmented_headers() {
    let mut req = HttpRequest::new();
    let mut buf = Vec::new();

    buf.extend_from_slice(b"GET /path ");
    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);

    buf.extend_from_slice(b"HTTP/1.1\r\n");
    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);
    assert_eq!(req.state, RequestState::ParsingHeaders);

    buf.extend_from_slice(b"Host: localhost\r\nUser-Agent: test\r\n\r\n");
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.state, RequestState::Complete);
}

#[test]
fn test_post_request_with_body() {
    let mut req = HttpRequest::new();
    let mut buf = b"POST /api HTTP/1.1\r\nHost: x\r\nContent-Length: 13\r\n\r\nHello, World!".to_vec();

    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);
    req.body.set_limit(1024).unwrap();
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.body.bytes(), b"Hello, World!");
}

#[test]
fn test_post_fragmented_body() {
    let mut req = HttpRequest::new();
    let mut buf = b"POST /data HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\r\n".to_vec();

    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);
    req.body.set_limit(1024).unwrap();
    assert_eq!(req.state, RequestState::ParsingBody);

    buf.extend_from_slice(b"12345");
    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);

    buf.extend_from_slice(b"67890");
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.body.bytes(), b"1234567890");
}

#[test]
fn test_pipelined_bytes_left_in_buffer() {
    let mut req = HttpRequest::new();
    let mut buf = b"POST /upload HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nHelloWorld".to_vec();

    req.parse(&mut buf);
    req.body.set_limit(1024).unwrap();
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.body.bytes(), b"Hello");
    assert_eq!(buf, b"World");
}

#[test]
fn test_header_value_parameters() {
    let mut req = HttpRequest::new();
    let mut buf = b"POST /u HTTP/1.1\r\nHost: x\r\nContent-Type: multipart/form-data; boundary=XX\r\n\r\n"
        .to_vec();
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);

    let content_type = req.headers.get("content-type").unwrap();
    assert_eq!(content_type.first_value(), "multipart/form-data");
    assert_eq!(content_type.param("boundary"), Some("XX"));
}

#[test]
fn test_singleton_header_duplicate_is_400() {
    let mut req = HttpRequest::new();
    let mut buf =
        b"GET / HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n".to_vec();
    assert_eq!(req.parse(&mut buf), ParseStatus::Failed(HTTP_BAD_REQUEST));
    assert_eq!(req.state, RequestState::Error);
}

#[test]
fn test_chunked_request_reassembles_in_order() {
    let mut req = HttpRequest::new();
    let mut buf = b"PUT /u/hi.txt HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();

    req.parse(&mut buf);
    req.body.set_limit(1024 * 1024).unwrap();

    buf.extend_from_slice(b"5\r\nhello\r\n");
    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);

    buf.extend_from_slice(b"6\r\n world\r\n");
    assert_eq!(req.parse(&mut buf), ParseStatus::Incomplete);

    buf.extend_from_slice(b"0\r\n\r\n");
    assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
    assert_eq!(req.body.bytes(), b"hello world");
    assert_eq!(req.body.len(), 11);
}

#[test]
fn test_oversize_header_block_is_413() {
    let mut req = HttpRequest::new();
    let mut buf = b"GET / HTTP/1.1\r\nHost: x\r\n".to_vec();
    for i in 0..4096 {
        buf.extend_from_slice(format!("X-Pad-{}: {}\r\n", i, "y".repeat(16)).as_bytes());
    }
    buf.extend_from_slice(b"\r\n");

    assert_eq!(
        req.parse(&mut buf),
        ParseStatus::Failed(HTTP_PAYLOAD_TOO_LARGE)
    );
}

#[test]
fn test_response_generation() {
    let mut res = HttpResponse::new(200);
    res.set_body(b"Hello Rust".to_vec(), "text/plain");
    res.finalize(true);

    let bytes = res.to_bytes();
    let s = String::from_utf8_lossy(&bytes);

    assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(s.contains("Content-Type: text/plain\r\n"));
    assert!(s.contains("Content-Length: 10\r\n"));
    assert!(s.ends_with("\r\n\r\nHello Rust"));
}
