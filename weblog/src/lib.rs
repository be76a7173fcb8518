//! Tiny logging facade for the server. Prints timestamped, colored lines to
//! stdout. The active level comes from the `WEBLOG` environment variable
//! (`error`, `warn`, `info`, `debug`, `trace`), defaulting to `info`.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

static ACTIVE_LEVEL: OnceLock<Level> = OnceLock::new();

pub fn active_level() -> Level {
    *ACTIVE_LEVEL.get_or_init(|| match std::env::var("WEBLOG") {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "error" => Level::Error,
            "warn" => Level::Warn,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            _ => Level::Info,
        },
        Err(_) => Level::Info,
    })
}

pub fn enabled(level: Level) -> bool {
    level <= active_level()
}

const DAYS_IN_MONTH: [u64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Formats a timestamp as `YYYY-MM-DD HH:MM:SS` (UTC) without pulling in a
/// date-time dependency.
pub fn format_time(now: SystemTime) -> String {
    let secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut days = secs / 86_400;
    let rem = secs % 86_400;

    let mut year = 1970;
    loop {
        let in_year = if is_leap(year) { 366 } else { 365 };
        if days < in_year {
            break;
        }
        days -= in_year;
        year += 1;
    }

    let mut month = 0;
    for (i, &len) in DAYS_IN_MONTH.iter().enumerate() {
        let len = if i == 1 && is_leap(year) { len + 1 } else { len };
        if days < len {
            month = i + 1;
            break;
        }
        days -= len;
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        days + 1,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

#[macro_export]
macro_rules! log {
    ($level:expr, $tag:expr, $color:expr, $($arg:tt)*) => {
        if $crate::enabled($level) {
            let ts = $crate::format_time(std::time::SystemTime::now());
            println!(
                "[{}] webserv \x1b[{}m{}\x1b[0m: {}",
                ts,
                $color,
                $tag,
                format!($($arg)*)
            );
        }
    };
}

#[macro_export]
macro_rules! error { ($($arg:tt)*) => { $crate::log!($crate::Level::Error, "ERROR", "31", $($arg)*); }; }
#[macro_export]
macro_rules! warn { ($($arg:tt)*) => { $crate::log!($crate::Level::Warn, "WARN ", "33", $($arg)*); }; }
#[macro_export]
macro_rules! info { ($($arg:tt)*) => { $crate::log!($crate::Level::Info, "INFO ", "32", $($arg)*); }; }
#[macro_export]
macro_rules! debug { ($($arg:tt)*) => { $crate::log!($crate::Level::Debug, "DEBUG", "36", $($arg)*); }; }
#[macro_export]
macro_rules! trace { ($($arg:tt)*) => { $crate::log!($crate::Level::Trace, "TRACE", "34", $($arg)*); }; }
