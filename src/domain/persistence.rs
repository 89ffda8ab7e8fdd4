//! State Persistence
//!
//! Durable mirror of the engine's state under one data directory, so a
//! restart resumes with the same breaker, positions and wallet statistics.
//!
//! Layout:
//! - `breaker_state.json`  circuit breaker snapshot
//! - `positions.json`      every position with its orders
//! - `signals.jsonl`       append-only signal log
//! - `wallet_stats.json`   per-wallet rolling statistics

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::circuit_breaker::CircuitBreakerState;
use super::position::Position;
use super::signal::SignalLogEntry;
use super::wallet_decay::WalletStats;

pub const BREAKER_FILE: &str = "breaker_state.json";
pub const POSITIONS_FILE: &str = "positions.json";
pub const SIGNAL_LOG_FILE: &str = "signals.jsonl";
pub const WALLET_STATS_FILE: &str = "wallet_stats.json";

#[derive(Error, Debug, Clone)]
pub enum PersistError {
    #[error("Failed to serialize state: {0}")]
    SerializationError(String),

    #[error("Failed to write state file: {0}")]
    WriteError(String),

    #[error("Failed to read state file: {0}")]
    ReadError(String),

    #[error("State file is corrupted: {0}")]
    CorruptedFile(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

/// Everything found on disk at startup
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    pub breaker: Option<CircuitBreakerState>,
    pub positions: Vec<Position>,
    pub wallet_stats: HashMap<String, WalletStats>,
}

/// JSON file store rooted at the data directory
#[derive(Debug, Clone)]
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    pub fn save_breaker(&self, state: &CircuitBreakerState) -> Result<(), PersistError> {
        self.write_json(BREAKER_FILE, state)?;
        tracing::debug!(status = ?state.status, "Breaker state saved");
        Ok(())
    }

    /// A file that exists but cannot be parsed is reported as corrupted
    pub fn load_breaker(&self) -> Result<Option<CircuitBreakerState>, PersistError> {
        self.read_json(BREAKER_FILE)
    }

    /// Drop a corrupted breaker file; used by a forced operator reset
    pub fn discard_breaker(&self) -> Result<(), PersistError> {
        let path = self.path(BREAKER_FILE);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| PersistError::WriteError(e.to_string()))?;
            tracing::warn!(path = %path.display(), "Breaker state file discarded");
        }
        Ok(())
    }

    pub fn save_positions(&self, positions: &[Position]) -> Result<(), PersistError> {
        self.write_json(POSITIONS_FILE, &positions)?;
        tracing::debug!(count = positions.len(), "Positions saved");
        Ok(())
    }

    pub fn load_positions(&self) -> Result<Vec<Position>, PersistError> {
        Ok(self.read_json(POSITIONS_FILE)?.unwrap_or_default())
    }

    pub fn save_wallet_stats(&self, stats: &HashMap<String, WalletStats>) -> Result<(), PersistError> {
        self.write_json(WALLET_STATS_FILE, stats)
    }

    pub fn load_wallet_stats(&self) -> Result<HashMap<String, WalletStats>, PersistError> {
        Ok(self.read_json(WALLET_STATS_FILE)?.unwrap_or_default())
    }

    pub fn append_signal(&self, entry: &SignalLogEntry) -> Result<(), PersistError> {
        self.ensure_dir()?;
        let mut line = serde_json::to_string(entry)
            .map_err(|e| PersistError::SerializationError(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(SIGNAL_LOG_FILE))
            .map_err(|e| PersistError::WriteError(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| PersistError::WriteError(e.to_string()))
    }

    /// Read the signal log; unparseable lines are reported, not skipped
    pub fn read_signal_log(&self) -> Result<Vec<SignalLogEntry>, PersistError> {
        let path = self.path(SIGNAL_LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| PersistError::ReadError(e.to_string()))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    PersistError::CorruptedFile(format!("{} line {}: {}", SIGNAL_LOG_FILE, n + 1, e))
                })
            })
            .collect()
    }

    /// Load every state file; any corruption aborts recovery
    pub fn recover(&self) -> Result<RecoveredState, PersistError> {
        let state = RecoveredState {
            breaker: self.load_breaker()?,
            positions: self.load_positions()?,
            wallet_stats: self.load_wallet_stats()?,
        };
        tracing::info!(
            breaker = state.breaker.is_some(),
            positions = state.positions.len(),
            wallets = state.wallet_stats.len(),
            data_dir = %self.data_dir.display(),
            "State recovered"
        );
        Ok(state)
    }

    fn ensure_dir(&self) -> Result<(), PersistError> {
        fs::create_dir_all(&self.data_dir).map_err(|e| PersistError::DirectoryError(e.to_string()))
    }

    /// Write through a temp file and rename so readers never see half a file
    fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<(), PersistError> {
        self.ensure_dir()?;
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| PersistError::SerializationError(e.to_string()))?;

        let path = self.path(file);
        let tmp = self.path(&format!("{}.tmp", file));
        fs::write(&tmp, content).map_err(|e| PersistError::WriteError(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| PersistError::WriteError(e.to_string()))
    }

    fn read_json<T: DeserializeOwned>(&self, file: &str) -> Result<Option<T>, PersistError> {
        let path = self.path(file);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| PersistError::ReadError(e.to_string()))?;
        if content.trim().is_empty() {
            return Err(PersistError::CorruptedFile(format!("{} is empty", file)));
        }

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistError::CorruptedFile(format!("{}: {}", file, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::BreakerStatus;
    use crate::domain::exit_strategy::ExitStrategy;
    use crate::domain::position::ExecutionMode;
    use crate::domain::signal::{Direction, Signal, SignalOutcome};
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn store() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        (dir, store)
    }

    #[test]
    fn test_empty_dir_recovers_nothing() {
        let (_dir, store) = store();
        let state = store.recover().unwrap();
        assert!(state.breaker.is_none());
        assert!(state.positions.is_empty());
        assert!(state.wallet_stats.is_empty());
    }

    #[test]
    fn test_breaker_save_and_load() {
        let (_dir, store) = store();
        let mut state = CircuitBreakerState::fresh(50.0);
        state.status = BreakerStatus::Open;
        state.open_positions_count = 2;
        store.save_breaker(&state).unwrap();

        let loaded = store.load_breaker().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!store.path("breaker_state.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_breaker_file() {
        let (_dir, store) = store();
        fs::create_dir_all(store.data_dir()).unwrap();
        fs::write(store.path(BREAKER_FILE), "{ not json").unwrap();

        assert!(matches!(store.load_breaker(), Err(PersistError::CorruptedFile(_))));
        assert!(matches!(store.recover(), Err(PersistError::CorruptedFile(_))));

        store.discard_breaker().unwrap();
        assert!(store.load_breaker().unwrap().is_none());
    }

    #[test]
    fn test_empty_breaker_file_is_corrupted() {
        let (_dir, store) = store();
        fs::create_dir_all(store.data_dir()).unwrap();
        fs::write(store.path(BREAKER_FILE), "  ").unwrap();
        assert!(matches!(store.load_breaker(), Err(PersistError::CorruptedFile(_))));
    }

    #[test]
    fn test_positions_persisted() {
        let (_dir, store) = store();
        let p = Position::new(
            Uuid::new_v4(),
            "MintA",
            "WalletA",
            1.0,
            2.0,
            ExecutionMode::Simulation,
            ExitStrategy::balanced(),
            Utc::now(),
        )
        .unwrap();
        store.save_positions(&[p.clone()]).unwrap();
        let loaded = store.load_positions().unwrap();
        assert_eq!(loaded, vec![p]);
    }

    #[test]
    fn test_signal_log_appends() {
        let (_dir, store) = store();
        for outcome in [SignalOutcome::BelowThreshold, SignalOutcome::Paused] {
            let entry = SignalLogEntry {
                signal: Signal {
                    id: Uuid::new_v4(),
                    wallet_id: "W".into(),
                    token_mint: "M".into(),
                    direction: Direction::Buy,
                    amount: 1.0,
                    observed_at: Utc::now(),
                    raw_source: "test".into(),
                },
                breakdown: None,
                outcome,
                logged_at: Utc::now(),
            };
            store.append_signal(&entry).unwrap();
        }
        let log = store.read_signal_log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].outcome, SignalOutcome::Paused);
    }
}
