use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EnvoyError, EnvoyResult};

pub const SERVER_URL_ENV: &str = "VIBE_SERVER_URL";

/// Preferences that survive restarts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub working_dir: String,
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8010".to_string(),
            working_dir: "~/projects".to_string(),
            model: "auto".to_string(),
        }
    }
}

/// Where settings are loaded from and saved to.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> EnvoyResult<Settings>;
    fn save(&self, settings: &Settings) -> EnvoyResult<()>;
}

/// JSON file store, by default at `~/.config/vibe/config.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> EnvoyResult<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            EnvoyError::Config(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find home directory",
            ))
        })?;
        Ok(Self::new(home.join(".config").join("vibe").join("config.json")))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SettingsStore for FileStore {
    fn load(&self) -> EnvoyResult<Settings> {
        if !self.path.exists() {
            let settings = Settings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> EnvoyResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Keeps settings in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: parking_lot::Mutex<Settings>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: parking_lot::Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> EnvoyResult<Settings> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &Settings) -> EnvoyResult<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

/// Current settings plus the store every change is written through to.
pub struct Preferences {
    settings: Settings,
    server_override: Option<String>,
    store: Box<dyn SettingsStore>,
}

impl Preferences {
    pub fn load(store: Box<dyn SettingsStore>) -> EnvoyResult<Self> {
        let settings = store.load()?;
        Ok(Self {
            settings,
            server_override: None,
            store,
        })
    }

    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings: settings.clone(),
            server_override: None,
            store: Box::new(MemoryStore::new(settings)),
        }
    }

    /// Read `VIBE_SERVER_URL` (after `.env`) as a non-persisted override.
    pub fn with_env_override(mut self) -> Self {
        self.server_override = std::env::var(SERVER_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn server_url(&self) -> &str {
        self.server_override
            .as_deref()
            .unwrap_or(&self.settings.server_url)
    }

    pub fn working_dir(&self) -> &str {
        &self.settings.working_dir
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn set_working_dir(&mut self, working_dir: impl Into<String>) -> EnvoyResult<()> {
        self.settings.working_dir = working_dir.into();
        self.store.save(&self.settings)
    }

    pub fn set_model(&mut self, model: impl Into<String>) -> EnvoyResult<()> {
        self.settings.model = model.into();
        self.store.save(&self.settings)
    }

    pub fn set_server_url(&mut self, server_url: impl Into<String>) -> EnvoyResult<()> {
        self.settings.server_url = server_url.into();
        self.store.save(&self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("config.json"));

        let settings = store.load().unwrap();

        assert_eq!(settings, Settings::default());
        assert!(store.path().exists());
    }

    #[test]
    fn changes_are_written_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut prefs = Preferences::load(Box::new(FileStore::new(&path))).unwrap();
        prefs.set_model("Sonnet 4.6").unwrap();
        prefs.set_working_dir("/srv/app").unwrap();

        let reloaded = FileStore::new(&path).load().unwrap();
        assert_eq!(reloaded.model, "Sonnet 4.6");
        assert_eq!(reloaded.working_dir, "/srv/app");
        assert_eq!(reloaded.server_url, "http://localhost:8010");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"model":"Opus 4.6"}"#).unwrap();

        let settings = FileStore::new(&path).load().unwrap();

        assert_eq!(settings.model, "Opus 4.6");
        assert_eq!(settings.working_dir, "~/projects");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileStore::new(&path).load(),
            Err(EnvoyError::Decode(_))
        ));
    }

    #[test]
    fn memory_store_round_trips_through_preferences() {
        let mut prefs = Preferences::in_memory(Settings::default());
        prefs.set_server_url("http://10.0.0.2:8010").unwrap();

        assert_eq!(prefs.server_url(), "http://10.0.0.2:8010");
    }
}
