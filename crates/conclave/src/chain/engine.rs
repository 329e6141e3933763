//! Tick loop that keeps the node identity moving.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::fingerprint;
use crate::config::{ChainConfig, FingerprintMode};
use crate::state::AppState;

/// Chain engine: fingerprints `base_dir` every tick and folds it into the chain
pub struct ChainEngine {
    state: AppState,
    base_dir: PathBuf,
    mode: FingerprintMode,
    interval: Duration,
}

impl ChainEngine {
    pub fn new(state: AppState, base_dir: PathBuf, config: &ChainConfig) -> Self {
        Self {
            state,
            base_dir,
            mode: config.fingerprint,
            interval: config.tick_interval(),
        }
    }

    /// Run one tick and return the new chain value.
    ///
    /// The walk runs on the blocking pool; the state lock is only taken to
    /// fold the result in. On error the previous chain is left untouched.
    pub async fn tick(&self) -> Result<String> {
        let dir = self.base_dir.clone();
        let mode = self.mode;
        let id = tokio::task::spawn_blocking(move || fingerprint(&dir, mode))
            .await
            .context("Fingerprint task panicked")?
            .with_context(|| format!("Failed to fingerprint {}", self.base_dir.display()))?;

        let (chain, links) = self.state.apply_fingerprint(&id).await;
        tracing::debug!(chain = %chain, links, "Chain advanced");
        Ok(chain)
    }

    /// Tick forever until shutdown. Failed ticks are logged and retried next interval.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            base_dir = %self.base_dir.display(),
            interval = ?self.interval,
            mode = ?self.mode,
            "⛓️ Chain engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %format!("{:#}", e), "Chain tick failed, keeping previous value");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("⛓️ Chain engine shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use conclave_common::constants::DEFAULT_CHAIN;
    use conclave_common::digest::sha256_hex;
    use std::fs;
    use tempfile::tempdir;

    fn engine_for(dir: &std::path::Path) -> (ChainEngine, AppState) {
        let config = AppConfig {
            node_id: Some("self".to_string()),
            base_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let state = AppState::new(config.clone()).unwrap();
        let engine = ChainEngine::new(state.clone(), config.base_dir.clone(), &config.chain);
        (engine, state)
    }

    #[tokio::test]
    async fn test_consecutive_ticks_chain_on_history() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file"), b"x").unwrap();
        let (engine, state) = engine_for(dir.path());

        let fp = fingerprint(dir.path(), FingerprintMode::Paths).unwrap();

        let first = engine.tick().await.unwrap();
        assert_eq!(first, fp);

        let second = engine.tick().await.unwrap();
        assert_eq!(second, sha256_hex(format!("{}{}", first, fp)));
        assert_ne!(first, second);

        let third = engine.tick().await.unwrap();
        assert_eq!(third, sha256_hex(format!("{}{}", second, fp)));
        assert_eq!(state.current_chain().await, third);
    }

    #[tokio::test]
    async fn test_empty_tree_starts_from_default_token() {
        let dir = tempdir().unwrap();
        let (engine, _state) = engine_for(dir.path());

        assert_eq!(engine.tick().await.unwrap(), DEFAULT_CHAIN);
        assert_eq!(
            engine.tick().await.unwrap(),
            sha256_hex(format!("{}{}", DEFAULT_CHAIN, DEFAULT_CHAIN))
        );
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_chain() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("tree");
        fs::create_dir(&base).unwrap();
        fs::write(base.join("file"), b"x").unwrap();
        let (engine, state) = engine_for(&base);

        let good = engine.tick().await.unwrap();
        fs::remove_dir_all(&base).unwrap();

        assert!(engine.tick().await.is_err());
        assert_eq!(state.current_chain().await, good);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let (engine, state) = engine_for(dir.path());

        let shutdown = state.subscribe_shutdown();
        let handle = tokio::spawn(async move { engine.run(shutdown).await });

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.current_chain().await, DEFAULT_CHAIN);
        assert!(state.identity().await.first_computed);

        state.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
