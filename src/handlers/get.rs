use crate::prelude::*;

/// GET and HEAD over the resolved filesystem path: file serve, index-file
/// probe, autoindex listing. HEAD goes through the same path; the body is
/// stripped after the response is composed.
pub fn handle_get(
    req: &HttpRequest,
    fs_path: &Path,
    cfg: &ServerConfig,
    location: &Location,
    mime: &MimeTable,
) -> HttpResponse {
    let meta = match fs::metadata(fs_path) {
        Ok(meta) => meta,
        Err(e) => {
            return match e.kind() {
                ErrorKind::NotFound => HttpResponse::error(HTTP_NOT_FOUND, Some(cfg), mime),
                ErrorKind::PermissionDenied => {
                    HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
                }
                _ => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
            };
        }
    };

    if meta.is_dir() {
        if !req.path.ends_with('/') {
            return HttpResponse::redirect(HTTP_MOVED_PERMANENTLY, &format!("{}/", req.path));
        }

        for index in location.directives.indexes() {
            let candidate = fs_path.join(index);
            if candidate.is_file() {
                return serve_file(&candidate, cfg, mime);
            }
        }

        if location.directives.autoindex() {
            return generate_autoindex(fs_path, &req.path, cfg, mime);
        }
        return HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime);
    }

    if meta.is_file() {
        return serve_file(fs_path, cfg, mime);
    }

    // Sockets, fifos and friends are not served.
    HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
}

fn serve_file(path: &Path, cfg: &ServerConfig, mime: &MimeTable) -> HttpResponse {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
    };

    if meta.len() > MAX_FILE_SIZE {
        warn!("{} exceeds the serve ceiling", path.display());
        return HttpResponse::error(HTTP_PAYLOAD_TOO_LARGE, Some(cfg), mime);
    }

    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) => {
            return match e.kind() {
                ErrorKind::PermissionDenied => {
                    HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
                }
                _ => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
            };
        }
    };

    let content_type = mime.resolve_with_probe(path, &content).to_string();
    let mut res = HttpResponse::new(HTTP_OK);
    if let Ok(modified) = meta.modified() {
        res.set_header("last-modified", &httpdate::fmt_http_date(modified));
    }
    res.set_body(content, &content_type);
    res
}

fn format_size(size: u64) -> String {
    const KIB: f64 = 1024.0;
    let size = size as f64;
    if size < KIB {
        format!("{} B", size as u64)
    } else if size < KIB * KIB {
        format!("{:.1} KB", size / KIB)
    } else if size < KIB * KIB * KIB {
        format!("{:.1} MB", size / (KIB * KIB))
    } else {
        format!("{:.1} GB", size / (KIB * KIB * KIB))
    }
}

/// Directory listing: Name / Last Modified / Size table, hidden entries
/// skipped, lexicographic order, `../` link above the root.
fn generate_autoindex(
    dir: &Path,
    uri: &str,
    cfg: &ServerConfig,
    mime: &MimeTable,
) -> HttpResponse {
    let entries = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(_) => return HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    html.push_str(&format!("<title>Index of {}</title>\n", uri));
    html.push_str("<style>\n");
    html.push_str("body { font-family: monospace; margin: 20px; }\n");
    html.push_str("table { border-collapse: collapse; }\n");
    html.push_str("th, td { padding: 5px 15px; text-align: left; }\n");
    html.push_str("th { border-bottom: 1px solid #000; }\n");
    html.push_str(".size { text-align: right; }\n");
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>Index of {}</h1>\n", uri));
    html.push_str("<table>\n");
    html.push_str("<tr><th>Name</th><th>Last Modified</th><th class=\"size\">Size</th></tr>\n");

    if uri != "/" {
        html.push_str("<tr><td colspan=\"3\"><a href=\"../\">../</a></td></tr>\n");
    }

    for name in &names {
        let entry_path = dir.join(name);
        let meta = match fs::metadata(&entry_path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let is_dir = meta.is_dir();
        let slash = if is_dir { "/" } else { "" };

        let modified = meta
            .modified()
            .map(httpdate::fmt_http_date)
            .unwrap_or_else(|_| "-".to_string());

        let size = if is_dir {
            "-".to_string()
        } else {
            format_size(meta.len())
        };

        html.push_str(&format!(
            "<tr><td><a href=\"{}{}\">{}{}</a></td><td>{}</td><td class=\"size\">{}</td></tr>\n",
            url_encode(name),
            slash,
            name,
            slash,
            modified,
            size
        ));
    }

    html.push_str("</table>\n<hr>\n");
    html.push_str(&format!("<address>{}</address>\n", SERVER_SOFTWARE));
    html.push_str("</body>\n</html>\n");

    let mut res = HttpResponse::new(HTTP_OK);
    res.set_body(html.into_bytes(), "text/html");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_setup() -> (TempDir, ServerConfig, MimeTable) {
        let dir = TempDir::new().unwrap();
        let mut cfg = ServerConfig::new();
        cfg.insert_server_name("test");
        cfg.directives.set_root_path(dir.path().to_str().unwrap());
        (dir, cfg, MimeTable::load())
    }

    fn location_for(dir: &TempDir, autoindex: bool, indexes: &[&str]) -> Location {
        let mut location = Location::new("/");
        location.directives.set_root_path(dir.path().to_str().unwrap());
        location.directives.set_autoindex(autoindex);
        for index in indexes {
            location.directives.insert_index(index);
        }
        location
    }

    fn get_request(path: &str) -> HttpRequest {
        let mut req = HttpRequest::new();
        let raw = format!("GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path);
        let mut buf = raw.into_bytes();
        assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
        req
    }

    #[test]
    fn test_serve_regular_file() {
        let (dir, cfg, mime) = test_setup();
        fs::write(dir.path().join("index.html"), "hello").unwrap();
        let location = location_for(&dir, false, &["index.html"]);

        let req = get_request("/index.html");
        let res = handle_get(&req, &dir.path().join("index.html"), &cfg, &location, &mime);

        assert_eq!(res.status_code, HTTP_OK);
        assert_eq!(res.body, b"hello");
        assert_eq!(res.header("content-type"), Some("text/html"));
        assert_eq!(res.header("content-length"), Some("5"));
        assert!(res.header("last-modified").is_some());
    }

    #[test]
    fn test_index_probe_order() {
        let (dir, cfg, mime) = test_setup();
        fs::write(dir.path().join("second.html"), "second").unwrap();
        let location = location_for(&dir, false, &["first.html", "second.html"]);

        let req = get_request("/");
        let res = handle_get(&req, dir.path(), &cfg, &location, &mime);
        assert_eq!(res.status_code, HTTP_OK);
        assert_eq!(res.body, b"second");
    }

    #[test]
    fn test_missing_file_is_404() {
        let (dir, cfg, mime) = test_setup();
        let location = location_for(&dir, false, &[]);
        let req = get_request("/nope.txt");
        let res = handle_get(&req, &dir.path().join("nope.txt"), &cfg, &location, &mime);
        assert_eq!(res.status_code, HTTP_NOT_FOUND);
    }

    #[test]
    fn test_directory_without_slash_redirects() {
        let (dir, cfg, mime) = test_setup();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let location = location_for(&dir, false, &[]);
        let req = get_request("/sub");
        let res = handle_get(&req, &dir.path().join("sub"), &cfg, &location, &mime);
        assert_eq!(res.status_code, HTTP_MOVED_PERMANENTLY);
        assert_eq!(res.header("location"), Some("/sub/"));
    }

    #[test]
    fn test_autoindex_listing() {
        let (dir, cfg, mime) = test_setup();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join(".hidden"), "x").unwrap();
        let location = location_for(&dir, true, &[]);

        let req = get_request("/d/");
        let res = handle_get(&req, dir.path(), &cfg, &location, &mime);
        assert_eq!(res.status_code, HTTP_OK);

        let body = String::from_utf8_lossy(&res.body).into_owned();
        assert!(body.contains("<title>Index of /d/</title>"));
        assert!(body.contains("a.txt"));
        assert!(body.contains("1 B"));
        assert!(body.contains("href=\"b/\""));
        assert!(body.contains("href=\"../\""));
        assert!(!body.contains(".hidden"));
        assert!(body.contains(SERVER_SOFTWARE));
    }

    #[test]
    fn test_autoindex_root_has_no_parent_link() {
        let (dir, cfg, mime) = test_setup();
        let location = location_for(&dir, true, &[]);
        let req = get_request("/");
        let res = handle_get(&req, dir.path(), &cfg, &location, &mime);
        let body = String::from_utf8_lossy(&res.body).into_owned();
        assert!(!body.contains("href=\"../\""));
    }

    #[test]
    fn test_directory_listing_denied_without_autoindex() {
        let (dir, cfg, mime) = test_setup();
        let location = location_for(&dir, false, &[]);
        let req = get_request("/");
        let res = handle_get(&req, dir.path(), &cfg, &location, &mime);
        assert_eq!(res.status_code, HTTP_FORBIDDEN);
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(1), "1 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
