//! Chain-watching abstraction. One `ChainScanner` implementation per
//! network; `DepositService` drives it through the three-step confirm flow
//! without caring how a given chain is actually read.

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct ChainDeposit {
    pub txid: String,
    pub vout: i32,
    pub address: String,
    pub amount: i64,
    pub confirmations: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    #[error("chain RPC error: {0}")]
    Rpc(String),
}

#[async_trait]
pub trait ChainScanner: Send + Sync {
    fn chain_id(&self) -> &str;
    async fn get_latest_height(&self) -> Result<u64, ScannerError>;
    async fn scan_block(&self, height: u64) -> Result<Vec<ChainDeposit>, ScannerError>;
    async fn reload_addresses(&self) -> Result<(), ScannerError>;
    fn watched_count(&self) -> usize;
}

/// Liveness tracking shared by every scanner's polling loop: if a tick
/// hasn't landed in more than twice the configured interval, the scanner is
/// considered stalled.
pub struct ScannerHeartbeat {
    interval_secs: u64,
    last_tick_at: std::sync::atomic::AtomicU64,
}

impl ScannerHeartbeat {
    pub fn new(interval_secs: u64) -> Self {
        Self { interval_secs, last_tick_at: std::sync::atomic::AtomicU64::new(now_secs()) }
    }

    pub fn tick(&self) {
        self.last_tick_at.store(now_secs(), std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        let last = self.last_tick_at.load(std::sync::atomic::Ordering::SeqCst);
        now_secs().saturating_sub(last) > self.interval_secs * 2
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let hb = ScannerHeartbeat::new(10);
        assert!(!hb.is_stale());
    }

    #[test]
    fn stale_detection_uses_double_the_interval() {
        let hb = ScannerHeartbeat::new(10);
        hb.last_tick_at.store(now_secs().saturating_sub(25), std::sync::atomic::Ordering::SeqCst);
        assert!(hb.is_stale());
    }
}
