//! SettingsStore - mutable device settings
//!
//! ## Responsibilities
//!
//! - Hold the runtime-mutable device settings (record/analysis toggles,
//!   thermal palette, PTZ mode, ...)
//! - Mark a change flag on any mutation; the main loop's health tick calls
//!   [`SettingsStore::flush_if_dirty`] to persist
//! - Serialize to JSON with the historical key names (`color_pallet` is kept
//!   misspelled for compatibility with deployed tooling)
//!
//! Writers never block readers for the duration of file I/O: persistence
//! clones a snapshot under the lock and writes outside it.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Flags are stored as 0/1 integers in the settings file
mod int_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_i32(if *value { 1 } else { 0 })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
        Ok(i32::deserialize(de)? != 0)
    }
}

/// Device settings as persisted to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(rename = "record_status", with = "int_bool")]
    pub record_on: bool,
    #[serde(rename = "analysis_status", with = "int_bool")]
    pub analysis_on: bool,
    pub nv_interval: i32,
    #[serde(rename = "opt_flow_apply", with = "int_bool")]
    pub opt_flow_on: bool,
    #[serde(rename = "resnet50_apply", with = "int_bool")]
    pub resnet50_on: bool,
    #[serde(rename = "enable_event_notify", with = "int_bool")]
    pub event_notify_on: bool,
    pub temp_correction: i32,
    #[serde(rename = "ptz_status")]
    pub ptz_mode: String,
    #[serde(rename = "color_pallet")]
    pub color_palette: i32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            record_on: false,
            analysis_on: false,
            nv_interval: 0,
            opt_flow_on: false,
            resnet50_on: false,
            event_notify_on: true,
            temp_correction: 0,
            ptz_mode: "off".to_string(),
            color_palette: 0,
        }
    }
}

/// SettingsStore instance
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<DeviceSettings>,
    changed: AtomicBool,
}

impl SettingsStore {
    /// Load from `path`; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let settings: DeviceSettings = serde_json::from_str(&raw)?;
                tracing::info!(
                    path = %path.display(),
                    record_on = settings.record_on,
                    analysis_on = settings.analysis_on,
                    "Device settings loaded"
                );
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Settings file not found, using defaults");
                DeviceSettings::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            settings: RwLock::new(settings),
            changed: AtomicBool::new(false),
        })
    }

    /// Current settings snapshot
    pub async fn snapshot(&self) -> DeviceSettings {
        self.settings.read().await.clone()
    }

    /// Whether a mutation has happened since the last persist
    pub fn is_dirty(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Persist unconditionally
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.path, json).await?;
        self.changed.store(false, Ordering::Release);
        tracing::info!(path = %self.path.display(), "Device settings saved");
        Ok(())
    }

    /// Persist only when the change flag is set (main-loop health tick)
    pub async fn flush_if_dirty(&self) -> Result<()> {
        if self.is_dirty() {
            self.save().await?;
        }
        Ok(())
    }

    async fn mutate<F>(&self, apply: F)
    where
        F: FnOnce(&mut DeviceSettings) -> bool,
    {
        let mut settings = self.settings.write().await;
        if apply(&mut settings) {
            self.changed.store(true, Ordering::Release);
        }
    }

    pub async fn set_record_on(&self, on: bool) {
        self.mutate(|s| {
            if s.record_on == on {
                return false;
            }
            s.record_on = on;
            tracing::info!(record_on = on, "Record status changed");
            true
        })
        .await;
    }

    pub async fn set_analysis_on(&self, on: bool) {
        self.mutate(|s| {
            if s.analysis_on == on {
                return false;
            }
            s.analysis_on = on;
            tracing::info!(analysis_on = on, "Analysis status changed");
            true
        })
        .await;
    }

    pub async fn set_nv_interval(&self, interval: i32) {
        self.mutate(|s| {
            if s.nv_interval == interval {
                return false;
            }
            s.nv_interval = interval;
            tracing::info!(nv_interval = interval, "NV interval changed");
            true
        })
        .await;
    }

    pub async fn set_opt_flow_on(&self, on: bool) {
        self.mutate(|s| {
            if s.opt_flow_on == on {
                return false;
            }
            s.opt_flow_on = on;
            tracing::info!(opt_flow_on = on, "Optical flow changed");
            true
        })
        .await;
    }

    pub async fn set_resnet50_on(&self, on: bool) {
        self.mutate(|s| {
            if s.resnet50_on == on {
                return false;
            }
            s.resnet50_on = on;
            tracing::info!(resnet50_on = on, "ResNet50 classifier changed");
            true
        })
        .await;
    }

    pub async fn set_event_notify_on(&self, on: bool) {
        self.mutate(|s| {
            if s.event_notify_on == on {
                return false;
            }
            s.event_notify_on = on;
            tracing::info!(event_notify_on = on, "Event notification changed");
            true
        })
        .await;
    }

    pub async fn set_temp_correction(&self, correction: i32) {
        self.mutate(|s| {
            if s.temp_correction == correction {
                return false;
            }
            s.temp_correction = correction;
            tracing::info!(temp_correction = correction, "Temperature correction changed");
            true
        })
        .await;
    }

    pub async fn set_ptz_mode(&self, mode: &str) {
        self.mutate(|s| {
            if s.ptz_mode == mode {
                return false;
            }
            s.ptz_mode = mode.to_string();
            tracing::info!(ptz_mode = mode, "PTZ mode changed");
            true
        })
        .await;
    }

    pub async fn set_color_palette(&self, palette: i32) {
        self.mutate(|s| {
            if s.color_palette == palette {
                return false;
            }
            s.color_palette = palette;
            tracing::info!(color_palette = palette, "Color palette changed");
            true
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_keys_and_int_flags() {
        let settings = DeviceSettings {
            record_on: true,
            event_notify_on: true,
            ..DeviceSettings::default()
        };
        let json: serde_json::Value = serde_json::to_value(&settings).unwrap();

        assert_eq!(json["record_status"], 1);
        assert_eq!(json["analysis_status"], 0);
        assert_eq!(json["enable_event_notify"], 1);
        assert_eq!(json["ptz_status"], "off");
        // Historical misspelling preserved on the wire
        assert_eq!(json["color_pallet"], 0);
        assert!(json.get("color_palette").is_none());
    }

    #[test]
    fn test_save_load_save_is_byte_identical() {
        let settings = DeviceSettings {
            record_on: true,
            nv_interval: 7,
            temp_correction: -3,
            ptz_mode: "manual".to_string(),
            color_palette: 2,
            ..DeviceSettings::default()
        };

        let first = serde_json::to_string_pretty(&settings).unwrap();
        let reloaded: DeviceSettings = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string_pretty(&reloaded).unwrap();

        assert_eq!(first, second);
        assert_eq!(settings, reloaded);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("device_setting.json"))
            .await
            .unwrap();
        assert_eq!(store.snapshot().await, DeviceSettings::default());
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_mutation_sets_dirty_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("device_setting.json"))
            .await
            .unwrap();

        // Same value: no dirty flag
        store.set_record_on(false).await;
        assert!(!store.is_dirty());

        store.set_record_on(true).await;
        assert!(store.is_dirty());

        store.save().await.unwrap();
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_flush_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device_setting.json");

        {
            let store = SettingsStore::load(&path).await.unwrap();
            store.set_analysis_on(true).await;
            store.set_nv_interval(i32::MAX).await;
            store.flush_if_dirty().await.unwrap();
        }

        let store = SettingsStore::load(&path).await.unwrap();
        let settings = store.snapshot().await;
        assert!(settings.analysis_on);
        assert_eq!(settings.nv_interval, i32::MAX);
    }
}
