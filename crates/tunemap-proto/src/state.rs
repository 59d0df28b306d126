//! Player preferences that survive restarts (volume, search radius).
//!
//! Session contents (localities, queue position) are deliberately absent:
//! a session never outlives the process, and ghost localities must never
//! reach disk.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub volume: f32,
    pub radius_km: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            volume: 0.5,
            radius_km: 2.0,
        }
    }
}

pub struct PreferencesStore {
    path: PathBuf,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable file yields `fallback`; a corrupt file is logged
    /// and ignored rather than blocking startup.
    pub fn load_or(&self, fallback: Preferences) -> Preferences {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return fallback,
        };
        match serde_json::from_str::<Preferences>(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("preferences: ignoring corrupt {:?}: {}", self.path, e);
                fallback
            }
        }
    }

    pub async fn save(&self, prefs: &Preferences) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(prefs)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
