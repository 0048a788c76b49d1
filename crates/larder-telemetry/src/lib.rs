//! Client-side telemetry for larder.
//!
//! [`TelemetryBuffer`] queues error reports and performance measurements,
//! stamps them with session and user context, and ships them to a
//! [`Collector`] in batches when connectivity allows. [`init_telemetry`]
//! wires up process logging, including the SQLite diagnostic log that
//! records failed flushes.

mod buffer;
mod collector;
mod diagnostics;
mod mock;
mod queue;
mod subscription;

pub use buffer::{BufferConfig, BufferStats, FlushReport, QueueStats, TelemetryBuffer};
pub use collector::{Collector, HttpCollector, HttpCollectorConfig};
pub use diagnostics::{
    DiagnosticQuery, DiagnosticRecord, FlushFailure, SqliteDiagnosticLayer, SqliteDiagnosticSink,
};
pub use mock::{MockCollector, MockResponse};
pub use queue::EventQueue;
pub use subscription::Subscription;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Process logging configuration.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "larder_proxy" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Persist warn+ events to the diagnostic database.
    pub persist_diagnostics: bool,
    pub diagnostics_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            persist_diagnostics: true,
            diagnostics_db_path: home_fallback().join("database/diagnostics.db"),
        }
    }
}

impl TelemetryConfig {
    fn filter_directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        directives
    }
}

/// Keeps the diagnostic sink reachable for queries after init.
pub struct TelemetryGuard {
    diagnostics: Option<Arc<SqliteDiagnosticSink>>,
}

impl TelemetryGuard {
    pub fn diagnostics(&self) -> Option<&SqliteDiagnosticSink> {
        self.diagnostics.as_deref()
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let (diagnostic_layer, diagnostics) = if config.persist_diagnostics {
        match SqliteDiagnosticSink::open(&config.diagnostics_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteDiagnosticLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("larder-telemetry: failed to open diagnostics DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(diagnostic_layer)
        .init();

    TelemetryGuard { diagnostics }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".larder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directives_include_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("larder_proxy".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(config.filter_directives(), "warn,larder_proxy=debug");
    }

    #[test]
    fn default_db_lives_under_larder_home() {
        let config = TelemetryConfig::default();
        assert!(config.diagnostics_db_path.ends_with(".larder/database/diagnostics.db"));
    }
}
