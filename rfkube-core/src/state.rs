//! Cluster state records
//!
//! One JSON record per backend under the state directory. A missing record
//! means the backend is `Absent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::BackendId;
use crate::error::{IoSnafu, JsonSnafu, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterPhase {
    Absent,
    Installing,
    Running,
    Degraded,
    Uninstalling,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub backend: BackendId,
    pub phase: ClusterPhase,
    pub registry_address: Option<String>,
    pub kubeconfig_path: PathBuf,
    /// Where the pre-existing kubeconfig was saved, if there was one
    pub kubeconfig_backup: Option<PathBuf>,
    /// Whether a kubeconfig existed before this cluster was installed
    pub had_prior_kubeconfig: bool,
    /// Last failure that moved the state to `Degraded`
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClusterState {
    pub fn new(backend: BackendId, kubeconfig_path: PathBuf) -> Self {
        Self {
            backend,
            phase: ClusterPhase::Absent,
            registry_address: None,
            kubeconfig_path,
            kubeconfig_backup: None,
            had_prior_kubeconfig: false,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Move to `phase`, stamping the time
    pub fn transition(&mut self, phase: ClusterPhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
        if phase != ClusterPhase::Degraded {
            self.last_error = None;
        }
    }

    pub fn degrade(&mut self, reason: impl Into<String>) {
        self.transition(ClusterPhase::Degraded);
        self.last_error = Some(reason.into());
    }

    pub fn is_running(&self) -> bool {
        self.phase == ClusterPhase::Running
    }
}

/// Persists [`ClusterState`] records, one file per backend
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, backend: BackendId) -> PathBuf {
        self.dir.join(format!("{backend}.json"))
    }

    /// Recorded state, or `None` when the backend is absent
    pub fn load(&self, backend: BackendId) -> Result<Option<ClusterState>> {
        let path = self.path_for(backend);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).context(IoSnafu { path: &path })?;
        let state = serde_json::from_str(&content).context(JsonSnafu {
            what: path.display().to_string(),
        })?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &ClusterState) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context(IoSnafu { path: &self.dir })?;
        let path = self.path_for(state.backend);
        let content = serde_json::to_string_pretty(state).context(JsonSnafu {
            what: format!("{} state", state.backend),
        })?;
        // write-then-rename so an interrupted save never leaves a torn record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).context(IoSnafu { path: &tmp })?;
        std::fs::rename(&tmp, &path).context(IoSnafu { path: &path })?;
        Ok(())
    }

    /// Reset to `Absent`; a missing record is fine
    pub fn clear(&self, backend: BackendId) -> Result<()> {
        let path = self.path_for(backend);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(crate::error::Error::Io { path, source }),
        }
    }

    pub fn phase(&self, backend: BackendId) -> Result<ClusterPhase> {
        Ok(self
            .load(backend)?
            .map_or(ClusterPhase::Absent, |state| state.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        assert_eq!(store.phase(BackendId::K3s).unwrap(), ClusterPhase::Absent);

        let mut state = ClusterState::new(BackendId::K3s, dir.path().join("config"));
        state.transition(ClusterPhase::Installing);
        store.save(&state).unwrap();
        assert_eq!(store.phase(BackendId::K3s).unwrap(), ClusterPhase::Installing);

        state.degrade("nodes never became Ready");
        store.save(&state).unwrap();
        let loaded = store.load(BackendId::K3s).unwrap().unwrap();
        assert_eq!(loaded.phase, ClusterPhase::Degraded);
        assert_eq!(loaded.last_error.as_deref(), Some("nodes never became Ready"));

        // records are per backend
        assert_eq!(store.phase(BackendId::Kind).unwrap(), ClusterPhase::Absent);

        store.clear(BackendId::K3s).unwrap();
        store.clear(BackendId::K3s).unwrap();
        assert!(store.load(BackendId::K3s).unwrap().is_none());
    }

    #[test]
    fn test_transition_clears_last_error() {
        let mut state = ClusterState::new(BackendId::Kind, PathBuf::from("/tmp/config"));
        state.degrade("boom");
        state.transition(ClusterPhase::Running);
        assert!(state.last_error.is_none());
        assert!(state.is_running());
    }
}
