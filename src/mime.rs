use crate::prelude::*;

const SYSTEM_MIME_TYPES: &str = "/etc/mime.types";
const DEFAULT_MIME: &str = "application/octet-stream";

/// Extension-to-type table, loaded once at startup from the system table
/// when it exists, always seeded with the builtin fallback map. Immutable
/// after load; handlers borrow it through an explicit parameter.
#[derive(Debug)]
pub struct MimeTable {
    by_extension: HashMap<String, String>,
}

impl MimeTable {
    pub fn load() -> Self {
        let mut table = MimeTable {
            by_extension: HashMap::new(),
        };
        table.insert_builtin();

        match fs::read_to_string(SYSTEM_MIME_TYPES) {
            Ok(content) => {
                let before = table.by_extension.len();
                table.parse_system_table(&content);
                debug!(
                    "mime: {} extensions loaded ({} from {})",
                    table.by_extension.len(),
                    table.by_extension.len() - before,
                    SYSTEM_MIME_TYPES
                );
            }
            Err(_) => {
                debug!("mime: {} not readable, using builtin table", SYSTEM_MIME_TYPES);
            }
        }

        table
    }

    /// `/etc/mime.types` format: `type/subtype ext1 ext2 ...` per line,
    /// `#` comments.
    fn parse_system_table(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let mime_type = match fields.next() {
                Some(t) if t.contains('/') => t,
                _ => continue,
            };
            for ext in fields {
                self.by_extension
                    .entry(ext.to_ascii_lowercase())
                    .or_insert_with(|| mime_type.to_string());
            }
        }
    }

    fn insert_builtin(&mut self) {
        const BUILTIN: &[(&str, &str)] = &[
            ("html", "text/html"),
            ("htm", "text/html"),
            ("css", "text/css"),
            ("js", "application/javascript"),
            ("json", "application/json"),
            ("txt", "text/plain"),
            ("xml", "application/xml"),
            ("csv", "text/csv"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("gif", "image/gif"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("ico", "image/x-icon"),
            ("pdf", "application/pdf"),
            ("zip", "application/zip"),
            ("gz", "application/gzip"),
            ("tar", "application/x-tar"),
            ("mp3", "audio/mpeg"),
            ("mp4", "video/mp4"),
            ("webm", "video/webm"),
            ("woff", "font/woff"),
            ("woff2", "font/woff2"),
            ("wasm", "application/wasm"),
        ];
        for (ext, mime_type) in BUILTIN {
            self.by_extension
                .insert((*ext).to_string(), (*mime_type).to_string());
        }
    }

    pub fn resolve(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|e| self.by_extension.get(&e))
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_MIME)
    }

    /// Magic-byte probe for a few well-known signatures, used when the
    /// extension says nothing.
    pub fn probe_magic(data: &[u8]) -> Option<&'static str> {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some("image/png")
        } else if data.starts_with(b"\xff\xd8\xff") {
            Some("image/jpeg")
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some("image/gif")
        } else if data.starts_with(b"%PDF-") {
            Some("application/pdf")
        } else if data.starts_with(b"PK\x03\x04") {
            Some("application/zip")
        } else {
            None
        }
    }

    pub fn resolve_with_probe(&self, path: &Path, data: &[u8]) -> &str {
        let by_ext = self.resolve(path);
        if by_ext == DEFAULT_MIME {
            if let Some(probed) = Self::probe_magic(data) {
                return probed;
            }
        }
        by_ext
    }

    /// Reverse lookup used to name uploads from their Content-Type.
    pub fn extension_for(content_type: &str) -> &'static str {
        match content_type {
            "application/json" => ".json",
            "application/pdf" => ".pdf",
            "application/xml" => ".xml",
            "application/zip" => ".zip",
            "audio/mpeg" => ".mp3",
            "image/gif" => ".gif",
            "image/jpeg" => ".jpg",
            "image/png" => ".png",
            "image/svg+xml" => ".svg",
            "image/webp" => ".webp",
            "text/css" => ".css",
            "text/html" => ".html",
            "text/javascript" => ".js",
            "text/plain" => ".txt",
            "video/mp4" => ".mp4",
            _ => ".bin",
        }
    }
}
