//! Configuration management

use crate::bridge::router::RoutingPolicy;
use crate::bridge::settings::SpeechSettings;
use crate::engine::BackendKind;
use crate::language::LanguageTag;
use crate::{BridgeError, Result};
use ini::Ini;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default name of the single-slot synthesis file
pub const DEFAULT_OUTPUT_FILE: &str = "ttsfile.wav";

/// Default bound on waiting for engine initialization
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 30_000;

/// Bridge configuration
///
/// Holds the engine backend choice, startup speech parameters, where
/// synthesized files go and how events are reported.
pub struct BridgeConfig {
    /// INI configuration storage
    ini: Ini,

    /// Config file path (~/.ttsbridge.cfg unless given explicitly)
    path: PathBuf,
}

impl BridgeConfig {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        debug!("Loading config from {:?}", path);

        let ini = if path.exists() {
            Ini::load_from_file(&path)
                .map_err(|e| BridgeError::IniParse(format!("Failed to load config: {}", e)))?
        } else {
            info!("Config file not found, creating default");
            let default = Self::default_config();
            default
                .write_to_file(&path)
                .map_err(|e| BridgeError::IniParse(format!("Failed to write config: {}", e)))?;
            default
        };

        Ok(Self { ini, path })
    }

    /// In-memory defaults, not backed by a file
    pub fn defaults() -> Self {
        Self {
            ini: Self::default_config(),
            path: Self::config_path(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        debug!("Saving config to {:?}", self.path);
        self.ini
            .write_to_file(&self.path)
            .map_err(|e| BridgeError::Config(format!("Failed to save config: {}", e)))
    }

    /// Get config file path (~/.ttsbridge.cfg)
    fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".ttsbridge.cfg")
    }

    /// Expose the config file path for display
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create default configuration
    fn default_config() -> Ini {
        let mut ini = Ini::new();

        ini.with_section(Some("engine"))
            .set("backend", "auto")
            .set("init_timeout_ms", DEFAULT_INIT_TIMEOUT_MS.to_string());

        ini.with_section(Some("speech"))
            .set("rate", "0.5")
            .set("pitch", "1.0")
            .set("volume", "1.0")
            .set("silence_ms", "0");

        ini.with_section(Some("output"))
            .set("file_name", DEFAULT_OUTPUT_FILE);

        ini.with_section(Some("events"))
            .set("report_silence_start", "true");

        ini
    }

    /// Get a boolean value from config
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get a string value from config
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.ini
            .get_from(Some(section), key)
            .unwrap_or(default)
            .to_string()
    }

    /// Get a non-empty string value, if present
    fn get_opt_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini
            .get_from(Some(section), key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Get an integer value from config
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Get a float value from config
    pub fn get_float(&self, section: &str, key: &str, default: f32) -> f32 {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Set a value in config
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.ini.with_section(Some(section)).set(key, value);
    }

    // Engine

    /// Which engine backend to start
    pub fn backend(&self) -> Result<BackendKind> {
        self.get_string("engine", "backend", "auto").parse()
    }

    /// Bound on the initialization wait; 0 means wait indefinitely
    pub fn init_timeout(&self) -> Option<Duration> {
        match self.get_int("engine", "init_timeout_ms", DEFAULT_INIT_TIMEOUT_MS as i64) {
            ms if ms <= 0 => None,
            ms => Some(Duration::from_millis(ms as u64)),
        }
    }

    // Speech

    /// Startup speech parameters
    ///
    /// Values outside their valid range are ignored with a warning.
    pub fn speech_settings(&self) -> SpeechSettings {
        let mut settings = SpeechSettings::new();

        settings.set_speech_rate(self.get_float("speech", "rate", settings.speech_rate()));

        let pitch = self.get_float("speech", "pitch", settings.pitch());
        if !settings.set_pitch(pitch) {
            warn!("Ignoring configured pitch {}", pitch);
        }

        let volume = self.get_float("speech", "volume", settings.volume());
        if !settings.set_volume(volume) {
            warn!("Ignoring configured volume {}", volume);
        }

        let silence = self.get_int("speech", "silence_ms", 0);
        if !settings.set_silence(silence) {
            warn!("Ignoring configured silence {}", silence);
        }

        if let Some(language) = self.get_opt_string("speech", "language") {
            match LanguageTag::parse(&language) {
                Some(tag) => settings.set_language(tag),
                None => warn!("Ignoring malformed language tag {:?}", language),
            }
        }

        if let Some(voice) = self.get_opt_string("speech", "voice") {
            settings.set_voice(voice);
        }

        settings
    }

    // Output

    /// Directory holding the synthesis file
    ///
    /// Defaults to the platform cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.get_opt_string("output", "cache_dir")
            .map(PathBuf::from)
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("ttsbridge")))
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Full path of the single-slot synthesis file
    pub fn output_file(&self) -> PathBuf {
        let name = self
            .get_opt_string("output", "file_name")
            .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string());
        self.cache_dir().join(name)
    }

    // Events

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            report_silence_start: self.get_bool("events", "report_silence_start", true),
        }
    }
}
