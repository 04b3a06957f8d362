use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::alert::AlertTiming;
use crate::constants::*;
use crate::environment::{AudioOutput, NotificationPermission, RuntimeSignals};
use crate::location::simulated::{SimulatedFailure, SimulatedProvider};
use crate::location::PositionOptions;

/// Application configuration with sensible defaults.
///
/// Can be overridden via ~/.config/safeguard/config.toml
#[derive(Debug, Clone)]
pub struct Config {
    /// Display name used in outgoing alerts
    pub user_name: Option<String>,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
    /// JSON file holding the emergency contacts
    pub contacts_file: PathBuf,
    pub alert: AlertConfig,
    pub location: LocationConfig,
    /// Runtime signals fed to the environment classifier
    pub environment: EnvironmentConfig,
    /// Stand-in positioning backend
    pub simulation: SimulationConfig,
    /// Problems found while loading, reported once logging is up
    pub warnings: Vec<String>,
}

/// Countdown and confirmation windows.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub countdown_secs: u32,
    pub confirmation_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            confirmation_secs: DEFAULT_CONFIRMATION_SECS,
        }
    }
}

/// Positioning policy.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub timeout_secs: u64,
    /// Oldest cached fix accepted without asking the provider (0 = never)
    pub max_age_secs: u64,
    pub high_accuracy: bool,
    pub watch_interval_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCATION_TIMEOUT_SECS,
            max_age_secs: DEFAULT_LOCATION_MAX_AGE_SECS,
            high_accuracy: true,
            watch_interval_ms: DEFAULT_WATCH_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Runtime identity string (user agent)
    pub identity: String,
    pub display_standalone: bool,
    pub native_signatures: Vec<String>,
    pub geolocation: bool,
    pub notifications: NotificationPermission,
    /// Labels of the audio outputs the host reports
    pub audio_outputs: Vec<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            display_standalone: false,
            native_signatures: vec![NATIVE_BRIDGE_SIGNATURE.to_string()],
            geolocation: true,
            notifications: NotificationPermission::Default,
            audio_outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub delay_ms: u64,
    pub failure: Option<SimulatedFailure>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_SIM_LATITUDE,
            longitude: DEFAULT_SIM_LONGITUDE,
            accuracy_meters: DEFAULT_SIM_ACCURACY_M,
            delay_ms: DEFAULT_SIM_DELAY_MS,
            failure: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_name: None,
            log_level: "info".to_string(),
            contacts_file: contacts_file_path(),
            alert: AlertConfig::default(),
            location: LocationConfig::default(),
            environment: EnvironmentConfig::default(),
            simulation: SimulationConfig::default(),
            warnings: Vec::new(),
        }
    }
}

/// TOML-deserializable config file format.
/// All fields are optional; missing fields use defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    user_name: Option<String>,
    log_level: Option<String>,
    contacts_file: Option<PathBuf>,
    alert: Option<FileAlertConfig>,
    location: Option<FileLocationConfig>,
    environment: Option<FileEnvironmentConfig>,
    simulation: Option<FileSimulationConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileAlertConfig {
    countdown_secs: Option<u32>,
    confirmation_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileLocationConfig {
    timeout_secs: Option<u64>,
    max_age_secs: Option<u64>,
    high_accuracy: Option<bool>,
    watch_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileEnvironmentConfig {
    identity: Option<String>,
    display_standalone: Option<bool>,
    native_signatures: Option<Vec<String>>,
    geolocation: Option<bool>,
    notifications: Option<NotificationPermission>,
    audio_outputs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileSimulationConfig {
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy_meters: Option<f64>,
    delay_ms: Option<u64>,
    failure: Option<SimulatedFailure>,
}

impl Config {
    /// Load config from ~/.config/safeguard/config.toml, falling back to
    /// defaults for any missing fields.
    pub fn load() -> Self {
        Self::load_from(config_file_path())
    }

    /// Load config from an explicit path. If the file doesn't exist,
    /// returns pure defaults; if it doesn't parse, returns defaults and
    /// records a warning.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = Config::default();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return config, // No config file, use defaults
        };

        let file_config: FileConfig = match toml::from_str(&content) {
            Ok(fc) => fc,
            Err(e) => {
                config.warnings.push(format!(
                    "failed to parse {}: {}; using defaults",
                    path.display(),
                    e
                ));
                return config;
            }
        };

        config.merge(file_config);
        config
    }

    fn merge(&mut self, file_config: FileConfig) {
        if let Some(v) = file_config.user_name {
            if !v.trim().is_empty() {
                self.user_name = Some(v);
            }
        }
        if let Some(v) = file_config.log_level {
            if !v.is_empty() {
                self.log_level = v;
            }
        }
        if let Some(v) = file_config.contacts_file {
            self.contacts_file = v;
        }

        if let Some(a) = file_config.alert {
            if let Some(v) = a.countdown_secs {
                self.alert.countdown_secs = v.clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS);
            }
            if let Some(v) = a.confirmation_secs {
                self.alert.confirmation_secs = v.clamp(1, MAX_CONFIRMATION_SECS);
            }
        }

        if let Some(l) = file_config.location {
            if let Some(v) = l.timeout_secs {
                self.location.timeout_secs = v.clamp(1, MAX_LOCATION_TIMEOUT_SECS);
            }
            if let Some(v) = l.max_age_secs {
                self.location.max_age_secs = v.min(MAX_LOCATION_MAX_AGE_SECS); // 0 = no cache
            }
            if let Some(v) = l.high_accuracy {
                self.location.high_accuracy = v;
            }
            if let Some(v) = l.watch_interval_ms {
                self.location.watch_interval_ms = v.max(100);
            }
        }

        if let Some(e) = file_config.environment {
            if let Some(v) = e.identity {
                self.environment.identity = v;
            }
            if let Some(v) = e.display_standalone {
                self.environment.display_standalone = v;
            }
            if let Some(v) = e.native_signatures {
                if !v.is_empty() {
                    self.environment.native_signatures = v;
                }
            }
            if let Some(v) = e.geolocation {
                self.environment.geolocation = v;
            }
            if let Some(v) = e.notifications {
                self.environment.notifications = v;
            }
            if let Some(v) = e.audio_outputs {
                self.environment.audio_outputs = v;
            }
        }

        if let Some(s) = file_config.simulation {
            if let Some(v) = s.latitude {
                self.simulation.latitude = v.clamp(-90.0, 90.0);
            }
            if let Some(v) = s.longitude {
                self.simulation.longitude = v.clamp(-180.0, 180.0);
            }
            if let Some(v) = s.accuracy_meters {
                self.simulation.accuracy_meters = v.max(0.0);
            }
            if let Some(v) = s.delay_ms {
                self.simulation.delay_ms = v;
            }
            if s.failure.is_some() {
                self.simulation.failure = s.failure;
            }
        }
    }

    pub fn alert_timing(&self) -> AlertTiming {
        AlertTiming {
            countdown_secs: self.alert.countdown_secs,
            tick: Duration::from_millis(COUNTDOWN_TICK_MS),
            confirmation: Duration::from_secs(self.alert.confirmation_secs),
        }
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.location.high_accuracy,
            timeout: Duration::from_secs(self.location.timeout_secs),
            maximum_age: Duration::from_secs(self.location.max_age_secs),
        }
    }

    /// Whether the host can position at all.
    pub fn geolocation_supported(&self) -> bool {
        self.environment.geolocation
            && self.simulation.failure != Some(SimulatedFailure::Unsupported)
    }

    pub fn runtime_signals(&self) -> RuntimeSignals {
        RuntimeSignals {
            identity: self.environment.identity.clone(),
            display_standalone: self.environment.display_standalone,
            native_signatures: self.environment.native_signatures.clone(),
            geolocation: self.geolocation_supported(),
            notifications: self.environment.notifications,
        }
    }

    pub fn audio_outputs(&self) -> Vec<AudioOutput> {
        self.environment
            .audio_outputs
            .iter()
            .map(|label| AudioOutput {
                label: label.clone(),
            })
            .collect()
    }

    pub fn simulated_provider(&self) -> SimulatedProvider {
        SimulatedProvider {
            latitude: self.simulation.latitude,
            longitude: self.simulation.longitude,
            accuracy_meters: self.simulation.accuracy_meters,
            delay: Duration::from_millis(self.simulation.delay_ms),
            watch_interval: Duration::from_millis(self.location.watch_interval_ms),
            failure: self.simulation.failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent.toml"));
        assert_eq!(config.alert.countdown_secs, 5);
        assert_eq!(config.alert.confirmation_secs, 5);
        assert_eq!(config.location.timeout_secs, 10);
        assert_eq!(config.environment.native_signatures, vec!["AppCreatorWebView"]);
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let (_dir, path) = write_config(
            r#"
user_name = "Priya"

[alert]
countdown_secs = 3

[location]
max_age_secs = 0

[environment]
identity = "Mozilla/5.0 AppCreatorWebView"
notifications = "granted"
audio_outputs = ["Boult Z40"]

[simulation]
latitude = 28.6139
failure = "permission-denied"
"#,
        );
        let config = Config::load_from(&path);

        assert_eq!(config.user_name.as_deref(), Some("Priya"));
        assert_eq!(config.alert.countdown_secs, 3);
        assert_eq!(config.alert.confirmation_secs, 5);
        assert_eq!(config.position_options().maximum_age, Duration::ZERO);
        assert_eq!(config.environment.notifications, NotificationPermission::Granted);
        assert_eq!(config.audio_outputs()[0].label, "Boult Z40");
        assert_eq!(config.simulation.latitude, 28.6139);
        assert_eq!(config.simulation.longitude, DEFAULT_SIM_LONGITUDE);
        assert_eq!(config.simulation.failure, Some(SimulatedFailure::PermissionDenied));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let (_dir, path) = write_config(
            r#"
[alert]
countdown_secs = 0
confirmation_secs = 9000

[location]
timeout_secs = 500
max_age_secs = 99999
"#,
        );
        let config = Config::load_from(&path);
        assert_eq!(config.alert.countdown_secs, MIN_COUNTDOWN_SECS);
        assert_eq!(config.alert.confirmation_secs, MAX_CONFIRMATION_SECS);
        assert_eq!(config.location.timeout_secs, MAX_LOCATION_TIMEOUT_SECS);
        assert_eq!(config.location.max_age_secs, MAX_LOCATION_MAX_AGE_SECS);
    }

    #[test]
    fn unparseable_file_falls_back_with_warning() {
        let (_dir, path) = write_config("[alert\ncountdown_secs = ");
        let config = Config::load_from(&path);
        assert_eq!(config.alert.countdown_secs, DEFAULT_COUNTDOWN_SECS);
        assert_eq!(config.warnings.len(), 1);
    }

    #[test]
    fn unsupported_failure_disables_geolocation() {
        let (_dir, path) = write_config("[simulation]\nfailure = \"unsupported\"\n");
        let config = Config::load_from(&path);
        assert!(!config.geolocation_supported());
        assert!(!config.runtime_signals().geolocation);
    }

    #[test]
    fn alert_timing_follows_config() {
        let mut config = Config::default();
        config.alert.countdown_secs = 8;
        config.alert.confirmation_secs = 20;
        let timing = config.alert_timing();
        assert_eq!(timing.countdown_secs, 8);
        assert_eq!(timing.tick, Duration::from_secs(1));
        assert_eq!(timing.confirmation, Duration::from_secs(20));
    }
}
