use crate::prelude::*;

/// DELETE over the resolved path: unlink a regular file, remove an empty
/// directory, refuse everything else.
pub fn handle_delete(fs_path: &Path, cfg: &ServerConfig, mime: &MimeTable) -> HttpResponse {
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

    if meta.permissions().readonly() {
        return HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime);
    }

    if meta.is_file() {
        return match fs::remove_file(fs_path) {
            Ok(()) => deleted_response(),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
            }
            Err(_) => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
        };
    }

    if meta.is_dir() {
        if !directory_is_empty(fs_path) {
            return HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime);
        }
        return match fs::remove_dir(fs_path) {
            Ok(()) => deleted_response(),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
            }
            Err(_) => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
        };
    }

    HttpResponse::error(HTTP_NOT_IMPLEMENTED, Some(cfg), mime)
}

fn directory_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}

fn deleted_response() -> HttpResponse {
    let mut res = HttpResponse::new(HTTP_OK);
    res.set_body(
        HttpResponse::default_status_body(HTTP_OK).into_bytes(),
        "text/html",
    );
    res
}
