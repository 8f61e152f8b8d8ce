//! TOML-backed configuration and persistence for the CLI host.
//!
//! The core treats settings and save-location memory as opaque
//! collaborators; this module is the CLI's implementation of both, stored
//! as a single TOML file under the user config directory.

use anyhow::{Context, Result};
use lanbeam_core::providers::{SaveLocationMemory, Settings, SettingsStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Everything the CLI persists.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Core settings blob.
    #[serde(default)]
    pub settings: Settings,
    /// Remembered save locations keyed by peer signature.
    #[serde(default)]
    pub remembered_locations: HashMap<String, PathBuf>,
}

impl CliConfig {
    /// Default path: `<config dir>/lanbeam/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lanbeam")
            .join("config.toml")
    }

    /// Load from `path`, or build defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            config.settings.display_name = gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|_| "lanbeam".to_string());
            config.settings.destination = dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."));
            return Ok(config);
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Persist to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// File-backed store handed to the engine; every mutation is flushed to
/// disk immediately.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<CliConfig>,
}

impl FileStore {
    /// Open (or initialize) the store at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = CliConfig::load_or_default(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn flush(&self, state: &CliConfig) {
        if let Err(e) = state.save(&self.path) {
            tracing::warn!(error = %e, "could not persist configuration");
        }
    }

    /// Current config snapshot.
    pub fn config(&self) -> CliConfig {
        self.state.lock().expect("config lock").clone()
    }

    /// Mutate and persist.
    pub fn update(&self, mutate: impl FnOnce(&mut CliConfig)) {
        let mut state = self.state.lock().expect("config lock");
        mutate(&mut state);
        self.flush(&state);
    }
}

impl SettingsStore for FileStore {
    fn load(&self) -> Settings {
        self.state.lock().expect("config lock").settings.clone()
    }

    fn save(&self, settings: &Settings) {
        let mut state = self.state.lock().expect("config lock");
        state.settings = settings.clone();
        self.flush(&state);
    }
}

impl SaveLocationMemory for FileStore {
    fn get(&self, signature: &str) -> Option<PathBuf> {
        self.state
            .lock()
            .expect("config lock")
            .remembered_locations
            .get(signature)
            .cloned()
    }

    fn set(&self, signature: &str, path: PathBuf) {
        let mut state = self.state.lock().expect("config lock");
        state
            .remembered_locations
            .insert(signature.to_string(), path);
        self.flush(&state);
    }

    fn default_location(&self) -> PathBuf {
        self.state
            .lock()
            .expect("config lock")
            .settings
            .destination
            .clone()
    }

    fn set_default(&self, path: PathBuf) {
        let mut state = self.state.lock().expect("config lock");
        state.settings.destination = path;
        self.flush(&state);
    }
}
