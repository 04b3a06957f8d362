//! Application-wide constants.
//!
//! Centralizes timing windows, positioning policy, wire tokens and paths
//! so the state machine and the trigger channels agree on one set of values.

use std::path::PathBuf;

// ── Countdown ─────────────────────────────────────────────────────
/// Seconds between activation and dispatch.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 5;
/// Lower bound for a configured countdown.
pub const MIN_COUNTDOWN_SECS: u32 = 1;
/// Upper bound for a configured countdown.
pub const MAX_COUNTDOWN_SECS: u32 = 60;
/// Interval between countdown ticks (ms).
pub const COUNTDOWN_TICK_MS: u64 = 1000;
/// How long the dispatch confirmation stays up before returning to Idle.
pub const DEFAULT_CONFIRMATION_SECS: u64 = 5;
/// Upper bound for the confirmation window.
pub const MAX_CONFIRMATION_SECS: u64 = 300;

// ── Positioning ───────────────────────────────────────────────────
/// Single-shot fix timeout (seconds).
pub const DEFAULT_LOCATION_TIMEOUT_SECS: u64 = 10;
/// Upper bound for the fix timeout.
pub const MAX_LOCATION_TIMEOUT_SECS: u64 = 120;
/// Oldest cached fix a single-shot request accepts (seconds).
pub const DEFAULT_LOCATION_MAX_AGE_SECS: u64 = 60;
/// Upper bound for the cached-fix age.
pub const MAX_LOCATION_MAX_AGE_SECS: u64 = 3600;
/// Cadence of simulated watch-mode updates (ms).
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 1000;
/// Samples retained by the location history.
pub const LOCATION_HISTORY_CAPACITY: usize = 5;
/// Accuracy (meters) at or below which a fix is graded good.
pub const ACCURACY_GOOD_METERS: f64 = 10.0;
/// Accuracy (meters) at or below which a fix is graded fair.
pub const ACCURACY_FAIR_METERS: f64 = 50.0;

/// Platform error code: capability absent.
pub const GEO_CODE_UNSUPPORTED: u16 = 0;
/// Platform error code: permission denied.
pub const GEO_CODE_PERMISSION_DENIED: u16 = 1;
/// Platform error code: position unavailable.
pub const GEO_CODE_POSITION_UNAVAILABLE: u16 = 2;
/// Platform error code: timeout.
pub const GEO_CODE_TIMEOUT: u16 = 3;

// ── Trigger Channels ──────────────────────────────────────────────
/// Identity substring that flags an embedding native shell.
pub const NATIVE_BRIDGE_SIGNATURE: &str = "AppCreatorWebView";
/// Discriminator of the only recognized cross-context bridge payload.
pub const BRIDGE_BUTTON_PRESS_TYPE: &str = "bluetoothButtonPress";
/// Name of the synthetic activation event raised by the bridge script.
pub const CUSTOM_ACTIVATION_EVENT: &str = "bluetoothButtonPressed";
/// Source of the externally loaded bridge script.
pub const BRIDGE_SCRIPT_SRC: &str = "/bluetooth-bridge.js";
/// Physical key code of the media play/pause key.
pub const MEDIA_PLAY_PAUSE_CODE: &str = "MediaPlayPause";
/// Legacy numeric key code of the media play/pause key.
pub const MEDIA_PLAY_PAUSE_KEY_CODE: u32 = 179;
/// Fallback key value that also activates.
pub const FALLBACK_ACTIVATION_KEY: &str = " ";
/// Element id of the injected fallback control.
pub const FALLBACK_BUTTON_ID: &str = "emergency-fallback-btn";
/// Visible label of the injected fallback control.
pub const FALLBACK_BUTTON_LABEL: &str = "EMERGENCY";
/// Audio output labels that indicate a headset with a media button.
pub const HEADSET_LABEL_PATTERNS: &[&str] = &["bluetooth", "boult"];

// ── Messages ──────────────────────────────────────────────────────
/// Map link prefix; a compatibility surface for message consumers.
pub const MAP_LINK_BASE: &str = "https://maps.google.com/?q=";
/// Walking-route link prefix.
pub const ROUTE_LINK_BASE: &str = "https://www.google.com/maps/dir/?api=1";
/// Display name used when the profile has none.
pub const DEFAULT_USER_NAME: &str = "User";
/// Timestamp format for outgoing messages.
pub const MESSAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Minimum gap between two local notifications of the same alert kind.
pub const NOTIFICATION_COOLDOWN_SECS: u64 = 30;

// ── Safety Tools ──────────────────────────────────────────────────
/// Caller shown on a fake incoming call.
pub const FAKE_CALL_CALLER: &str = "Mom";
/// Seconds before a fake call switches from ringing to connected.
pub const FAKE_CALL_CONNECT_SECS: u64 = 2;
pub const SAFE_MODE_ON_NOTICE: &str = "Safe Mode activated - Enhanced security enabled";
pub const SAFE_MODE_OFF_NOTICE: &str = "Safe Mode deactivated";

// ── Simulation ────────────────────────────────────────────────────
/// Default simulated latitude.
pub const DEFAULT_SIM_LATITUDE: f64 = 12.9716;
/// Default simulated longitude.
pub const DEFAULT_SIM_LONGITUDE: f64 = 77.5946;
/// Default simulated accuracy (meters).
pub const DEFAULT_SIM_ACCURACY_M: f64 = 15.0;
/// Default simulated fix latency (ms).
pub const DEFAULT_SIM_DELAY_MS: u64 = 800;
/// Accuracy floor of a simulated fix when high accuracy is not requested
/// (network positioning, meters).
pub const SIM_COARSE_ACCURACY_M: f64 = 150.0;
/// Per-update drift applied in simulated watch mode (degrees).
pub const SIM_WATCH_DRIFT_DEG: f64 = 0.00005;

// ── Paths ─────────────────────────────────────────────────────────

/// Returns the user's home directory, falling back to /tmp.
pub fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Returns `~/.config/safeguard/`.
pub fn config_dir() -> PathBuf {
    home_dir().join(".config").join("safeguard")
}

/// Returns `~/.config/safeguard/config.toml`.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Returns `~/.local/share/safeguard/`.
pub fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("safeguard")
}

/// Returns `~/.local/share/safeguard/contacts.json`.
pub fn contacts_file_path() -> PathBuf {
    data_dir().join("contacts.json")
}
