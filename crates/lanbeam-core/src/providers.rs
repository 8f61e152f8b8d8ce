//! Collaborator interfaces the core consumes but does not implement.
//!
//! The host process composes these at startup and passes handles in; the
//! core never reaches for globals. Production implementations live with
//! the host (TOML settings store, OS host introspection, GUI pickers); the
//! in-memory implementations here serve tests and headless embedding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// User-facing settings, read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Display name advertised in hellos.
    pub display_name: String,
    /// Default destination directory for accepted transfers.
    pub destination: PathBuf,
    /// Discovery/data port. The engine treats it as fixed once started.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether the host should show notifications.
    #[serde(default = "default_true")]
    pub show_notifications: bool,
    /// Theme identifier, opaque to the core.
    #[serde(default)]
    pub theme: String,
    /// Whether the host should start with the OS session.
    #[serde(default)]
    pub autostart: bool,
}

fn default_port() -> u16 {
    6442
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: "lanbeam".to_string(),
            destination: PathBuf::from("."),
            port: default_port(),
            show_notifications: true,
            theme: String::new(),
            autostart: false,
        }
    }
}

/// Settings persistence, owned by the host.
pub trait SettingsStore: Send + Sync {
    /// Load the current settings.
    fn load(&self) -> Settings;
    /// Persist new settings.
    fn save(&self, settings: &Settings);
}

/// Remembered save locations, keyed by peer signature.
pub trait SaveLocationMemory: Send + Sync {
    /// The remembered directory for a peer, when one exists.
    fn get(&self, signature: &str) -> Option<PathBuf>;
    /// Remember a directory for a peer.
    fn set(&self, signature: &str, path: PathBuf);
    /// The fallback destination directory.
    fn default_location(&self) -> PathBuf;
    /// Change the fallback destination directory.
    fn set_default(&self, path: PathBuf);
}

/// Host identity introspection.
pub trait HostInfo: Send + Sync {
    /// Machine hostname.
    fn hostname(&self) -> String;
    /// Logged-in username.
    fn username(&self) -> String;
    /// Platform string (e.g. `linux`, `windows`, `macos`).
    fn platform(&self) -> String;
    /// Free-form system description.
    fn system(&self) -> String;
}

/// File/directory chooser, owned by the UI.
pub trait FsPicker: Send + Sync {
    /// Let the user pick files to send.
    fn pick_files(&self) -> Option<Vec<PathBuf>>;
    /// Let the user pick a destination directory.
    fn pick_directory(&self) -> Option<PathBuf>;
}

// ----------------------------------------------------------------------
// In-memory implementations
// ----------------------------------------------------------------------

/// Settings store holding everything in memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
}

impl MemorySettingsStore {
    /// Create a store seeded with `settings`.
    #[must_use]
    pub fn with(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Settings {
        self.settings.lock().expect("settings lock").clone()
    }

    fn save(&self, settings: &Settings) {
        *self.settings.lock().expect("settings lock") = settings.clone();
    }
}

/// Save-location memory holding everything in memory.
#[derive(Debug)]
pub struct MemorySaveLocations {
    remembered: Mutex<HashMap<String, PathBuf>>,
    default_location: Mutex<PathBuf>,
}

impl MemorySaveLocations {
    /// Create a memory with a default destination.
    #[must_use]
    pub fn new(default_location: PathBuf) -> Self {
        Self {
            remembered: Mutex::new(HashMap::new()),
            default_location: Mutex::new(default_location),
        }
    }
}

impl SaveLocationMemory for MemorySaveLocations {
    fn get(&self, signature: &str) -> Option<PathBuf> {
        self.remembered
            .lock()
            .expect("save location lock")
            .get(signature)
            .cloned()
    }

    fn set(&self, signature: &str, path: PathBuf) {
        self.remembered
            .lock()
            .expect("save location lock")
            .insert(signature.to_string(), path);
    }

    fn default_location(&self) -> PathBuf {
        self.default_location
            .lock()
            .expect("save location lock")
            .clone()
    }

    fn set_default(&self, path: PathBuf) {
        *self.default_location.lock().expect("save location lock") = path;
    }
}

/// Fixed host identity, for tests and headless hosts.
#[derive(Debug, Clone)]
pub struct StaticHostInfo {
    /// Hostname to report.
    pub hostname: String,
    /// Username to report.
    pub username: String,
    /// Platform string to report.
    pub platform: String,
    /// System string to report.
    pub system: String,
}

impl HostInfo for StaticHostInfo {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn username(&self) -> String {
        self.username.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn system(&self) -> String {
        self.system.clone()
    }
}

/// Picker that never picks anything; for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPicker;

impl FsPicker for NoPicker {
    fn pick_files(&self) -> Option<Vec<PathBuf>> {
        None
    }

    fn pick_directory(&self) -> Option<PathBuf> {
        None
    }
}
