// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging initialization.
//!
//! The collector logs through `tracing`; host applications that already run
//! a subscriber need nothing from here. For everything else, [`init_logging`]
//! wires up a `tracing-subscriber` formatter with `RUST_LOG` support.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Configuration for logging initialization.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to include the target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Custom filter directive (overrides default_level).
    pub filter_directive: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_target: true,
            ansi_colors: true,
            filter_directive: None,
        }
    }
}

impl LogConfig {
    /// Verbose output for debugging the collector itself.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_target: true,
            ansi_colors: true,
            filter_directive: Some("aiobs=debug".to_string()),
        }
    }

    /// Minimal output for embedding in a host application.
    pub fn quiet() -> Self {
        Self {
            default_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            filter_directive: None,
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }
}

/// Guard returned by [`init_logging`]; keep it alive for the program's lifetime.
pub struct LogGuard {
    _private: (),
}

/// Initialize logging with the given configuration.
///
/// Call once at application startup. Fails if another subscriber is already
/// installed.
pub fn init_logging(config: &LogConfig) -> io::Result<LogGuard> {
    let filter = match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive)
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.default_level))),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}", config.default_level))),
    };

    let fmt_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LogGuard { _private: () })
}
