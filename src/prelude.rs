pub use crate::config::{Directives, Location, ServerConfig};
pub use crate::error::{Result, ServerError};
pub use crate::http::*;
pub use crate::mime::MimeTable;
pub use crate::trie::PrefixTree;

pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use weblog::{debug, error, info, trace, warn};

pub use std::collections::{HashMap, VecDeque};
pub use std::fmt::{self, Display};
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::str::FromStr;
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub const SERVER_SOFTWARE: &str = "webserv/1.0";

pub const READ_BUF_SIZE: usize = 4096;
pub const MAX_REQUEST_LINE: usize = 16 * 1024;
pub const MAX_HEADER_LINE: usize = 16 * 1024;
pub const MAX_HEADER_BLOCK: usize = 32 * 1024;
pub const MAX_CHUNK_SIZE_LINE: usize = 18;
pub const BODY_SPILL_THRESHOLD: usize = 1024 * 1024;
pub const MAX_CGI_OUTPUT: usize = 10 * 1024 * 1024;
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_INTERNAL_REDIRECTS: usize = 10;
pub const TEMP_FILE_PREFIX: &str = "webserv-";

pub const DEFAULT_CLIENT_MAX_BODY_SIZE: usize = 1024 * 1024;
pub const DEFAULT_AUTOINDEX: bool = false;
pub const DEFAULT_KEEP_ALIVE: bool = true;
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CGI_TIMEOUT_SECS: u64 = 30;

// 2xx / 3xx
pub const HTTP_OK: u16 = 200;
pub const HTTP_CREATED: u16 = 201;
pub const HTTP_NO_CONTENT: u16 = 204;
pub const HTTP_MOVED_PERMANENTLY: u16 = 301;
pub const HTTP_FOUND: u16 = 302;
pub const HTTP_NOT_MODIFIED: u16 = 304;

// 4xx
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;

// 5xx
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_VERSION_NOT_SUPPORTED: u16 = 505;
pub const HTTP_GATEWAY_TIMEOUT: u16 = 504;
