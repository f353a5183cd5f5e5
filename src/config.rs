//! Process-wide configuration.
//!
//! Loaded from a layered source (`config/default.toml`, then an optional
//! `config/<profile>.toml`, then `EXCHANGE_*` environment overrides) via the
//! `config` crate. Per-symbol trading parameters live in `symbol.rs` and are
//! loaded from Postgres separately — this struct only holds process
//! bootstrap settings.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,

    /// Bounded size of each symbol's command inbox (`ArrayQueue`).
    pub engine_inbox_capacity: usize,
    /// Bounded size of each symbol's event outbox.
    pub engine_outbox_capacity: usize,

    pub settlement_consumer_group: String,
    pub settlement_claim_idle_secs: u64,
    pub settlement_dlq_retry_threshold: u32,

    pub withdraw_daily_cap_default: u64,
    pub withdraw_min_default: u64,
    pub internal_rpc_token: String,

    pub deposit_scanner_poll_interval_secs: u64,

    pub log_dir: String,
    pub log_file: String,
    pub log_level: String,
    pub log_rotation: String,
    pub log_use_json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("EXCHANGE").separator("__"))
            .build()?;
        settings.try_deserialize()
    }

    pub fn claim_idle(&self) -> Duration {
        Duration::from_secs(self.settlement_claim_idle_secs)
    }

    pub fn deposit_poll_interval(&self) -> Duration {
        Duration::from_secs(self.deposit_scanner_poll_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/exchange".into(),
            database_max_connections: 10,
            redis_url: "redis://127.0.0.1:6379".into(),
            engine_inbox_capacity: 4096,
            engine_outbox_capacity: 4096,
            settlement_consumer_group: "clearing-group".into(),
            settlement_claim_idle_secs: 30,
            settlement_dlq_retry_threshold: 10,
            withdraw_daily_cap_default: u64::MAX,
            withdraw_min_default: 0,
            internal_rpc_token: "dev-token".into(),
            deposit_scanner_poll_interval_secs: 15,
            log_dir: "logs".into(),
            log_file: "exchange-core.log".into(),
            log_level: "info".into(),
            log_rotation: "daily".into(),
            log_use_json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.claim_idle(), Duration::from_secs(30));
        assert_eq!(cfg.deposit_poll_interval(), Duration::from_secs(15));
    }
}
