//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section has `#[serde(default)]`
//! so a partial settings file only needs the keys it changes.

use std::collections::BTreeMap;

use larder_core::security::FATSECRET;
use larder_core::UserIdPolicy;
use serde::{Deserialize, Serialize};

/// Root settings for the Larder services.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LarderSettings {
    pub name: String,
    pub logging: LoggingSettings,
    pub telemetry: TelemetrySettings,
    pub collector: CollectorSettings,
    pub proxy: ProxySettings,
}

impl Default for LarderSettings {
    fn default() -> Self {
        Self {
            name: "larder".to_string(),
            logging: LoggingSettings::default(),
            telemetry: TelemetrySettings::default(),
            collector: CollectorSettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` still wins when set.
    pub level: String,
    /// Per-module overrides, e.g. `{"larder_proxy": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
    /// Persist warn+ events to the diagnostics database.
    pub persist_diagnostics: bool,
    /// Relative to `~/.larder`.
    pub diagnostics_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            persist_diagnostics: true,
            diagnostics_db_path: "database/diagnostics.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Periodic flush interval.
    pub flush_interval_secs: u64,
    /// Per-queue bound; oldest events are dropped beyond it. 0 = unbounded.
    pub max_queue_len: usize,
    /// Echo every captured event to the local log.
    pub dev_mode: bool,
    pub user_id_policy: UserIdPolicy,
    /// URL stamped on events captured by this process.
    pub host_url: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
            max_queue_len: 1000,
            dev_mode: false,
            user_id_policy: UserIdPolicy::RetainOnLogout,
            host_url: "larder://proxy".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorSettings {
    pub errors_url: String,
    pub metrics_url: String,
    pub timeout_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            errors_url: "http://127.0.0.1:9093/api/monitoring/errors".to_string(),
            metrics_url: "http://127.0.0.1:9093/api/monitoring/performance".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub token_url: String,
    pub api_url: String,
    pub default_max_results: u32,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
            token_url: FATSECRET.token_url.to_string(),
            api_url: FATSECRET.api_url.to_string(),
            default_max_results: 20,
        }
    }
}
