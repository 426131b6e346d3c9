//! In-memory record of executed backtests.
//!
//! Every `exec.bt` run is recorded after its final frame so `get.bts`
//! can report what has been replayed. The record does not survive a
//! restart; it exists for the UI's session history.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Most runs kept in the history; older ones fall off.
const MAX_RUN_HISTORY: usize = 100;

/// Metadata for one finished backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestMeta {
    pub id: String,
    pub symbol: String,
    pub tf: String,
    pub start: i64,
    pub end: i64,
    pub candles: usize,
    pub trades: usize,
    /// Wall-clock start of the run, epoch milliseconds.
    pub launched_at: i64,
}

/// Store of finished runs, newest first.
pub struct BacktestStore {
    runs: Arc<RwLock<Vec<BacktestMeta>>>,
}

impl BacktestStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Record a finished run, evicting the oldest beyond the cap.
    pub async fn record(&self, meta: BacktestMeta) {
        let mut runs = self.runs.write().await;
        runs.insert(0, meta);
        runs.truncate(MAX_RUN_HISTORY);
    }

    /// Snapshot of recorded runs, newest first.
    pub async fn list(&self) -> Vec<BacktestMeta> {
        self.runs.read().await.clone()
    }
}

/// Generate a random run ID.
pub fn generate_run_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Current wall-clock time, epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
