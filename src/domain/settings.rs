use crate::domain::pages::ActivityProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rolling period of log files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Log output for the ingest service and the replay tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives such as `info,qus_connect::infrastructure=debug`.
    /// `RUST_LOG` takes precedence.
    pub filter: String,
    pub console: bool,
    pub ansi: bool,
    /// Rolling files are written only when a directory is set.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub rotation: LogRotation,
    pub source_locations: bool,
    pub thread_ids: bool,
    pub targets: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            console: true,
            ansi: true,
            directory: None,
            file_prefix: "qus_connect".to_string(),
            rotation: LogRotation::Daily,
            source_locations: false,
            thread_ids: false,
            targets: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

/// Message-bus identity used when publishing trackpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            user_id: String::new(),
            client_id: String::new(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl PublisherSettings {
    /// Topic for full trackpoint records.
    pub fn topic(&self) -> String {
        format!("{}/{}/tp", self.topic_prefix, self.client_id)
    }

    /// Topic for the reduced live monitoring payload.
    pub fn live_topic(&self) -> String {
        format!("{}/{}/live", self.topic_prefix, self.client_id)
    }
}

fn default_topic_prefix() -> String {
    "mobile".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LogSettings,

    // Scan / Connection Settings
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_enable_notifications: bool,
    #[serde(default = "default_true")]
    pub write_with_response: bool,
    #[serde(default)]
    pub last_connected_device: Option<String>,

    // Session Settings
    #[serde(default = "default_stopwatch_tick_ms")]
    pub stopwatch_tick_ms: u64,
    #[serde(default)]
    pub default_profile: ActivityProfile,

    // Publishing
    #[serde(default)]
    pub publisher: PublisherSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LogSettings::default(),
            scan_timeout_ms: default_scan_timeout_ms(),
            auto_enable_notifications: true,
            write_with_response: true,
            last_connected_device: None,
            stopwatch_tick_ms: default_stopwatch_tick_ms(),
            default_profile: ActivityProfile::default(),
            publisher: PublisherSettings::default(),
        }
    }
}

impl Settings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn stopwatch_tick(&self) -> Duration {
        Duration::from_millis(self.stopwatch_tick_ms.max(1))
    }
}

fn default_scan_timeout_ms() -> u64 {
    5000
}
fn default_stopwatch_tick_ms() -> u64 {
    500
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn from_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("QusConnect");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        Self::write(&self.settings, &self.settings_path)
    }

    /// Persist a copy of the settings, e.g. off the thread that owns them.
    pub fn write(settings: &Settings, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Returns `true` when the stored device changed and needs saving.
    pub fn set_last_connected_device(&mut self, device: &str) -> bool {
        if self.settings.last_connected_device.as_deref() == Some(device) {
            return false;
        }
        self.settings.last_connected_device = Some(device.to_string());
        true
    }
}
