//! Injected logging capability.
//!
//! Endpoints and sessions log through a `Logger` handed to them at
//! construction instead of a process-wide per-subsystem object. The capability
//! is a named `log` target, so records still flow through whatever backend the
//! binary installed (env_logger in `main.rs`).

use std::fmt;
use std::sync::Arc;

use log::Level;

/// Cloneable handle that emits records under a fixed target.
#[derive(Debug, Clone)]
pub struct Logger {
    target: Arc<str>,
}

impl Logger {
    pub fn new(target: impl Into<Arc<str>>) -> Self {
        Self { target: target.into() }
    }

    /// Default capability for server endpoints.
    pub fn server() -> Self {
        Self::new("ipclane::server")
    }

    /// Default capability for client endpoints.
    pub fn client() -> Self {
        Self::new("ipclane::client")
    }

    /// Capability used when building messages, which happens outside any
    /// endpoint (payload truncation is reported here).
    pub fn message() -> Self {
        Self::new("ipclane::message")
    }

    /// Capability used while loading configuration, before endpoints exist.
    pub fn config() -> Self {
        Self::new("ipclane::config")
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        log::log_enabled!(target: &*self.target, level)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: &*self.target, level, "{}", args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("ipclane")
    }
}
