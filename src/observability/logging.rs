//! Structured logging setup using the tracing crate
//!
//! ## Log Format Options
//!
//! `LOG_FORMAT` selects one of:
//!
//! - `json` - Structured JSON, for collection on a host
//! - `pretty` - Multi-line with colors, for development
//! - `compact` - Single-line with colors, for a bench terminal
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty, compact (default json)
//! - `LOG_SPANS`: include span open/close events (default false)
//! - `RUST_LOG`: overrides filtering entirely
//!
//! ```bash
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG soilbridge run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_flag(s: &str) -> bool {
    s.eq_ignore_ascii_case("true")
}

/// Dependencies whose chatter stays at warn unless RUST_LOG says otherwise
const QUIET_TARGETS: &[&str] = &[
    "tokio_tungstenite=warn",
    "tungstenite=warn",
    "tokio=warn",
    "mio=warn",
];

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    for directive in QUIET_TARGETS {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn span_events(include_spans: bool) -> fmt::format::FmtSpan {
    if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    }
}

/// Initialize logging with explicit settings. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events(include_spans));
            subscriber.with(layer).try_init()
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events(include_spans));
            subscriber.with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_span_events(span_events(include_spans));
            subscriber.with(layer).try_init()
        }
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

/// Initialize logging from environment variables, with `verbosity` from the
/// command line raising the level above `LOG_LEVEL`
pub fn init_default_logging(verbosity: u8) {
    let mut level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    level = match verbosity {
        0 => level,
        1 => level.max(Level::DEBUG),
        _ => Level::TRACE,
    };

    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = parse_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans);
}

/// Span wrapping one node run (bridge or sensor)
#[macro_export]
macro_rules! node_span {
    ($($field:tt)*) => {
        tracing::info_span!("node", $($field)*)
    };
}

/// Span around a transport session attempt or teardown
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::info_span!("session", $($field)*)
    };
}

/// Span around serial link traffic
#[macro_export]
macro_rules! link_span {
    ($($field:tt)*) => {
        tracing::debug_span!("serial_link", $($field)*)
    };
}

pub use {link_span, node_span, session_span};
