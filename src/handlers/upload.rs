use crate::prelude::*;

/// POST without CGI stores the body under the location root. The filename
/// comes from `Content-Disposition: filename=...` when one was sent,
/// otherwise it is generated from the upload time and Content-Type.
pub fn handle_upload(
    req: &HttpRequest,
    fs_path: &Path,
    cfg: &ServerConfig,
    mime: &MimeTable,
) -> HttpResponse {
    if !fs_path.is_dir() {
        return HttpResponse::error(HTTP_NOT_FOUND, Some(cfg), mime);
    }

    let name = match upload_filename(req) {
        Ok(name) => name,
        Err(code) => return HttpResponse::error(code, Some(cfg), mime),
    };

    let target = match available_target(fs_path, &name) {
        Some(target) => target,
        None => {
            warn!("no free name for upload '{}' in {}", name, fs_path.display());
            return HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime);
        }
    };

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(file) => file,
        Err(e) => {
            warn!("upload open {} failed: {}", target.display(), e);
            return match e.kind() {
                ErrorKind::PermissionDenied => {
                    HttpResponse::error(HTTP_FORBIDDEN, Some(cfg), mime)
                }
                _ => HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime),
            };
        }
    };

    if req.body.write_to(&mut file).is_err() {
        let _ = fs::remove_file(&target);
        return HttpResponse::error(HTTP_INTERNAL_SERVER_ERROR, Some(cfg), mime);
    }

    let stored = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    info!("stored upload {} ({} bytes)", target.display(), req.body.len());

    let mut res = HttpResponse::new(HTTP_CREATED);
    let body = format!(
        "<!DOCTYPE html>\n<html><body>\n<h1>Upload complete</h1>\n\
         <p>Saved as {}</p>\n</body></html>\n",
        stored
    );
    res.set_body(body.into_bytes(), "text/html");
    res
}

/// Client-supplied filenames are restricted to a single path component
/// with no control bytes.
fn sanitize_filename(name: &str) -> Option<String> {
    if name.is_empty()
        || name.contains("..")
        || name
            .chars()
            .any(|c| c as u32 <= 0x1f || c == '/' || c == '\\' || c == ':')
    {
        return None;
    }
    Some(name.to_string())
}

fn upload_filename(req: &HttpRequest) -> std::result::Result<String, u16> {
    if let Some(header) = req.headers.get("content-disposition") {
        if let Some(filename) = header.param("filename") {
            return sanitize_filename(filename).ok_or(HTTP_BAD_REQUEST);
        }
    }

    let millis = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let ext = MimeTable::extension_for(req.headers.first_value("content-type").unwrap_or(""));
    Ok(format!("upload_{}{}", millis, ext))
}

/// Numeric suffixes resolve name collisions, up to `_99`.
fn available_target(dir: &Path, name: &str) -> Option<PathBuf> {
    let first = dir.join(name);
    if !first.exists() {
        return Some(first);
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (name.to_string(), String::new()),
    };

    for i in 1..=99 {
        let candidate = dir.join(format!("{}_{}{}", stem, i, ext));
        if !candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
