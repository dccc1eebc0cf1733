//! Observability: structured logging and the diagnostic sink

pub mod diagnostics;
pub mod logging;

pub use diagnostics::{sanitize, DiagnosticSink, REMOTE_TARGET};
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{link_span, node_span, session_span};
