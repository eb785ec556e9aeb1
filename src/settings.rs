use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerSettings {
    /// How long each story stays on screen before auto-advancing.
    pub view_duration_ms: u64,
    /// Progress bar refresh period. Purely visual.
    pub progress_tick_ms: u64,
    /// Stories at least this old are dropped at load.
    pub retention_ms: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub storage_key: String,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            view_duration_ms: 5_000,
            progress_tick_ms: 50,
            retention_ms: 24 * 60 * 60 * 1000,
            max_width: 1080,
            max_height: 1920,
            jpeg_quality: 85,
            storage_key: "storiesData".into(),
        }
    }
}

impl ViewerSettings {
    pub fn view_duration(&self) -> Duration {
        Duration::from_millis(self.view_duration_ms.max(1))
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.retention_ms).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    viewer: ViewerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn viewer(&self) -> ViewerSettings {
        self.read().viewer.clone()
    }

    pub fn update_viewer(&self, settings: ViewerSettings) -> Result<()> {
        let mut guard = self.write();
        let next = UserSettings { viewer: settings };
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
