use crate::prelude::*;
use std::os::unix::fs::DirBuilderExt;

/// PUT creates or replaces the file at the resolved path, creating any
/// missing parent directories with mode 0755. 201 on creation, 204 on
/// replacement.
pub fn handle_put(
    req: &HttpRequest,
    fs_path: &Path,
    cfg: &ServerConfig,
    mime: &MimeTable,
) -> HttpResponse {
    let existed = fs_path.exists();

    if let Some(parent) = fs_path.parent() {
        if !parent.exists() {
            let created = fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent);
            if created.is_err() {
                warn!("cannot create {} for PUT", parent.display());
                return HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime);
            }
        }
    }

    let mut file = match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(fs_path)
    {
        Ok(file) => file,
        Err(e) => {
            warn!("PUT open {} failed: {}", fs_path.display(), e);
            return match e.kind() {
                ErrorKind::PermissionDenied => {
                    HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
                }
                _ => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
            };
        }
    };

    // Streams from the spill file when the body left memory.
    if req.body.write_to(&mut file).is_err() {
        return HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime);
    }

    let mut res = HttpResponse::new(if existed { HTTP_NO_CONTENT } else { HTTP_CREATED });
    if existed {
        res.set_header("content-length", "0");
    } else {
        res.set_body(Vec::new(), "text/plain");
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cfg() -> (ServerConfig, MimeTable) {
        let mut cfg = ServerConfig::new();
        cfg.insert_server_name("test");
        (cfg, MimeTable::load())
    }

    fn put_request(body: &[u8]) -> HttpRequest {
        let mut req = HttpRequest::new();
        let head = format!(
            "PUT /f HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut buf = head.into_bytes();
        buf.extend_from_slice(body);
        req.parse(&mut buf);
        req.body.set_limit(10 * 1024 * 1024).unwrap();
        assert_eq!(req.parse(&mut buf), ParseStatus::Complete);
        req
    }

    #[test]
    fn test_put_creates_file() {
        let dir = TempDir::new().unwrap();
        let (cfg, mime) = test_cfg();
        let target = dir.path().join("new.txt");
        let req = put_request(b"hello world");

        let res = handle_put(&req, &target, &cfg, &mime);
        assert_eq!(res.status_code, HTTP_CREATED);
        assert_eq!(fs::read(&target).unwrap(), b"hello world");
    }

    #[test]
    fn test_put_replaces_file() {
        let dir = TempDir::new().unwrap();
        let (cfg, mime) = test_cfg();
        let target = dir.path().join("existing.txt");
        fs::write(&target, "old old old").unwrap();
        let req = put_request(b"new");

        let res = handle_put(&req, &target, &cfg, &mime);
        assert_eq!(res.status_code, HTTP_NO_CONTENT);
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_put_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let (cfg, mime) = test_cfg();
        let target = dir.path().join("a/b/c.txt");
        let req = put_request(b"deep");

        let res = handle_put(&req, &target, &cfg, &mime);
        assert_eq!(res.status_code, HTTP_CREATED);
        assert_eq!(fs::read(&target).unwrap(), b"deep");

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir.path().join("a")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
