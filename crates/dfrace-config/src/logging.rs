//! Structured logging utilities for dfrace components.
//!
//! Provides consistent logging with component tags and structured fields.
//! The per-iteration race path only logs at `debug`/`trace` so an enabled
//! subscriber does not widen the window it is trying to hit.
//!
//! # Usage
//!
//! ```ignore
//! use dfrace_config::logging::*;
//!
//! log_controller_debug!("Iteration complete", iteration = 3);
//! log_perturb_warn!("Socket open failed", slot = 17);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CONTROLLER: &'static str = "CONTROLLER";
    pub const MUTATOR: &'static str = "MUTATOR";
    pub const PERTURB: &'static str = "PERTURB";
    pub const TARGET: &'static str = "TARGET";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === CONTROLLER logging macros ===

#[macro_export]
macro_rules! log_controller_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CONTROLLER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_controller_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CONTROLLER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_controller_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::CONTROLLER, $($key = $value,)* $msg)
    };
}

// === MUTATOR logging macros ===

#[macro_export]
macro_rules! log_mutator_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::MUTATOR, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_mutator_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::MUTATOR, $($key = $value,)* $msg)
    };
}

// === PERTURB logging macros ===

#[macro_export]
macro_rules! log_perturb_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::PERTURB, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_perturb_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::PERTURB, $($key = $value,)* $msg)
    };
}

// === TARGET logging macros ===

#[macro_export]
macro_rules! log_target_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::TARGET, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "DFRACE_LOG";

/// Initialize logging with the given fallback level.
/// Call this once at application startup.
///
/// `DFRACE_LOG` wins over `RUST_LOG`; `level` applies when neither is set.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // try_init: tests may install a subscriber more than once per process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}
