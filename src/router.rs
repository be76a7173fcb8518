use crate::handlers;
use crate::prelude::*;

/// What request processing decided: an immediate response, or a CGI child
/// to spawn whose output becomes the response later.
#[derive(Debug)]
pub enum Dispatch {
    Respond(HttpResponse),
    StartCgi(CgiPlan),
}

#[derive(Debug, Clone)]
pub struct CgiPlan {
    pub script: PathBuf,
    pub interpreter: Option<PathBuf>,
    pub location_path: String,
    pub document_root: String,
    pub timeout: Duration,
}

/// Runs the routing pipeline for a completed request: location selection,
/// method allow-list, redirect short-circuit, path resolution, and finally
/// the method handler.
pub fn dispatch(req: &HttpRequest, cfg: &ServerConfig, mime: &MimeTable) -> Dispatch {
    let location = match cfg.find_location(&req.path) {
        Some(location) => location,
        None => {
            debug!("no location matches {}", req.path);
            return Dispatch::Respond(HttpResponse::error(HTTP_NOT_FOUND, Some(cfg), mime));
        }
    };
    trace!("{} {} -> location '{}'", req.method, req.path, location.path());

    if !location.directives.allows_method(&req.method) {
        let mut res = HttpResponse::error(HTTP_METHOD_NOT_ALLOWED, Some(cfg), mime);
        res.set_header("allow", &location.directives.allowed_methods().join(", "));
        return Dispatch::Respond(res);
    }

    if let Some((code, target)) = location.directives.redirect() {
        return Dispatch::Respond(HttpResponse::redirect(code, target));
    }

    if req.method == Method::Post {
        if let Some(cgi_path) = location.directives.cgi_path() {
            return plan_cgi(req, cfg, location, cgi_path, mime);
        }
    }

    let root = match location.directives.root_path() {
        Some(root) => root,
        None => {
            warn!("location '{}' has no root", location.path());
            // POST with neither CGI nor an upload target is unimplemented;
            // anything else is a configuration hole.
            let code = if req.method == Method::Post {
                HTTP_NOT_IMPLEMENTED
            } else {
                HTTP_INTERNAL_SERVER_ERROR
            };
            return Dispatch::Respond(HttpResponse::error(code, Some(cfg), mime));
        }
    };

    let fs_path = match resolve_fs_path(root, location.path(), &req.path) {
        Ok(path) => path,
        Err(code) => return Dispatch::Respond(HttpResponse::error(code, Some(cfg), mime)),
    };

    let response = match &req.method {
        Method::Get | Method::Head => handlers::handle_get(req, &fs_path, cfg, location, mime),
        Method::Delete => handlers::handle_delete(&fs_path, cfg, mime),
        Method::Put => handlers::handle_put(req, &fs_path, cfg, mime),
        Method::Post => handlers::handle_upload(req, &fs_path, cfg, mime),
        Method::Extension(_) => HttpResponse::error(HTTP_NOT_IMPLEMENTED, Some(cfg), mime),
    };

    Dispatch::Respond(response)
}

fn plan_cgi(
    req: &HttpRequest,
    cfg: &ServerConfig,
    location: &Location,
    cgi_path: &str,
    mime: &MimeTable,
) -> Dispatch {
    let document_root = location
        .directives
        .root_path()
        .unwrap_or(cgi_path)
        .to_string();

    let (script, interpreter) = match fs::metadata(cgi_path) {
        Ok(meta) if meta.is_dir() => {
            // The script lives under cgi_path at the URI's tail.
            match resolve_fs_path(cgi_path, location.path(), &req.path) {
                Ok(script) => (script, None),
                Err(code) => {
                    return Dispatch::Respond(HttpResponse::error(code, Some(cfg), mime));
                }
            }
        }
        Ok(meta) if meta.is_file() => {
            // cgi_path is the interpreter; the script sits under the root.
            let script = match resolve_fs_path(&document_root, location.path(), &req.path) {
                Ok(script) => script,
                Err(code) => {
                    return Dispatch::Respond(HttpResponse::error(code, Some(cfg), mime));
                }
            };
            (script, Some(PathBuf::from(cgi_path)))
        }
        _ => {
            warn!("cgi_path {} is unusable", cgi_path);
            return Dispatch::Respond(HttpResponse::error(
                HTTP_INTERNAL_SERVER_ERROR,
                Some(cfg),
                mime,
            ));
        }
    };

    if !script.is_file() {
        debug!("cgi script {} not found", script.display());
        return Dispatch::Respond(HttpResponse::error(HTTP_NOT_FOUND, Some(cfg), mime));
    }

    Dispatch::StartCgi(CgiPlan {
        script,
        interpreter,
        location_path: location.path().to_string(),
        document_root,
        timeout: location.directives.cgi_timeout(),
    })
}

/// Joins the decoded URI path (minus the location prefix) onto the root and
/// refuses anything that would escape it. Lexical `..` handling covers
/// paths that do not exist yet; canonicalization double-checks the ones
/// that do.
pub fn resolve_fs_path(
    root: &str,
    location_path: &str,
    uri_path: &str,
) -> std::result::Result<PathBuf, u16> {
    let prefix = location_path.trim_end_matches('/');
    let relative = if prefix.is_empty() {
        uri_path
    } else {
        uri_path.strip_prefix(prefix).unwrap_or(uri_path)
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(HTTP_FORBIDDEN);
                }
            }
            s if s.contains('\0') => return Err(HTTP_BAD_REQUEST),
            s => segments.push(s),
        }
    }

    let mut path = PathBuf::from(root);
    for segment in &segments {
        path.push(segment);
    }

    if let (Ok(canonical_root), Ok(canonical)) = (fs::canonicalize(root), fs::canonicalize(&path)) {
        if !canonical.starts_with(&canonical_root) {
            return Err(HTTP_FORBIDDEN);
        }
    }

    Ok(path)
}
