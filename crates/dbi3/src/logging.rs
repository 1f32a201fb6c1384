//! Logging configuration for the DBI3 tool.
//!
//! Download progress and conversion summaries go to the `dbi3` target. Every
//! line exchanged with the instrument goes to [`WIRE_TARGET`] at trace level;
//! a log download is tens of thousands of lines, so the wire target stays off
//! below [`Verbosity::Trace`] even when `dbi3` is at debug.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target for the raw serial exchange.
pub const WIRE_TARGET: &str = "dbi3::wire";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Suppress all output except errors.
    Quiet,
    /// Normal output level (info and above).
    #[default]
    Normal,
    /// Verbose output (debug and above), without the serial exchange.
    Verbose,
    /// Everything, including each line sent to and read from the device.
    Trace,
}

impl Verbosity {
    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Whether the serial exchange is shown.
    #[must_use]
    pub fn shows_wire(&self) -> bool {
        *self == Self::Trace
    }

    /// `EnvFilter` directives for this verbosity.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        let wire = if self.shows_wire() { "trace" } else { "off" };
        format!("dbi3={},{WIRE_TARGET}={wire}", self.to_level_filter())
    }
}

/// Initialize the logging system.
///
/// This should be called once at application startup. The logging level can be
/// controlled via:
/// 1. The `verbosity` parameter
/// 2. The `RUST_LOG` environment variable (takes precedence), e.g.
///    `RUST_LOG=dbi3=info,dbi3::wire=trace` to watch the serial exchange alone
///
/// # Examples
///
/// ```no_run
/// use dbi3::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(verbosity != Verbosity::Normal)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Ignore the error if a subscriber is already installed
    let _ = subscriber.try_init();
}

/// Initialize logging for tests.
///
/// Only warnings and errors are shown, written through the test harness.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
