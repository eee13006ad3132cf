use crate::protocol::{DaemonState, Target};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What survives a reboot: the content set the device was showing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistentState {
    pub last_target: Option<Target>,
}

pub struct StateManager {
    state: Arc<RwLock<DaemonState>>,
    state_file: PathBuf,
    persisted: RwLock<PersistentState>,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);
        let state = DaemonState {
            rev: 1,
            ..DaemonState::default()
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            state_file,
            persisted: RwLock::new(persistent),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    /// Target to resume at startup, if one was saved.
    pub async fn last_target(&self) -> Option<Target> {
        self.persisted.read().await.last_target.clone()
    }

    /// Replaces the published snapshot, keeping `rev` monotonic.
    pub async fn publish(&self, snapshot: DaemonState) -> anyhow::Result<()> {
        let target_changed = self.persisted.read().await.last_target != snapshot.target;
        {
            let mut state = self.state.write().await;
            let rev = state.rev + 1;
            *state = DaemonState { rev, ..snapshot };
        }
        if target_changed {
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = {
            let state = self.state.read().await;
            PersistentState {
                last_target: state.target.clone(),
            }
        };
        *self.persisted.write().await = persistent.clone();

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
        }
        PersistentState::default()
    }
}
