//! Runtime environment classification.
//!
//! The embedding runtime is inspected once at startup. The result is an
//! immutable [`Capabilities`] table handed to the trigger aggregator, the
//! location service and the notifier, so no component inspects the host on
//! its own.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::constants::{HEADSET_LABEL_PATTERNS, NATIVE_BRIDGE_SIGNATURE};
use crate::triggers::TriggerChannel;

/// Where the app is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentProfile {
    /// Embedded in a controlled native shell.
    NativeBridge,
    /// Launched as an installed app (standalone display mode).
    StandaloneInstalled,
    /// Plain browser tab.
    Browser,
}

impl fmt::Display for EnvironmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentProfile::NativeBridge => write!(f, "native-bridge"),
            EnvironmentProfile::StandaloneInstalled => write!(f, "standalone"),
            EnvironmentProfile::Browser => write!(f, "browser"),
        }
    }
}

/// Host permission state for system notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPermission {
    Granted,
    Denied,
    #[default]
    Default,
}

/// Ambient runtime signals, read once.
#[derive(Debug, Clone)]
pub struct RuntimeSignals {
    /// Runtime identity string (user agent).
    pub identity: String,
    /// Result of the standalone display-mode media query.
    pub display_standalone: bool,
    /// Substrings of `identity` that flag a native shell.
    pub native_signatures: Vec<String>,
    /// Whether the host exposes a positioning capability at all.
    pub geolocation: bool,
    pub notifications: NotificationPermission,
}

impl Default for RuntimeSignals {
    fn default() -> Self {
        Self {
            identity: String::new(),
            display_standalone: false,
            native_signatures: vec![NATIVE_BRIDGE_SIGNATURE.to_string()],
            geolocation: true,
            notifications: NotificationPermission::Default,
        }
    }
}

/// Classify the runtime. A native-bridge signature always wins over the
/// display-mode signal.
pub fn classify(signals: &RuntimeSignals) -> EnvironmentProfile {
    let identity = signals.identity.to_lowercase();
    let native = signals
        .native_signatures
        .iter()
        .filter(|sig| !sig.is_empty())
        .any(|sig| identity.contains(&sig.to_lowercase()));

    if native {
        EnvironmentProfile::NativeBridge
    } else if signals.display_standalone {
        EnvironmentProfile::StandaloneInstalled
    } else {
        EnvironmentProfile::Browser
    }
}

/// Everything downstream components need to know about the runtime.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub profile: EnvironmentProfile,
    pub display_standalone: bool,
    /// Channels the trigger aggregator should wire up.
    pub channels: BTreeSet<TriggerChannel>,
    pub geolocation: bool,
    pub notifications: NotificationPermission,
}

impl Capabilities {
    /// Compute the capability table from raw signals.
    pub fn detect(signals: &RuntimeSignals) -> Self {
        let profile = classify(signals);

        let mut channels = BTreeSet::from([
            TriggerChannel::BridgeMessage,
            TriggerChannel::CustomActivation,
            TriggerChannel::DirectPress,
        ]);
        // Native shells swallow media keys; they get a visible control instead
        // unless the app is already presented standalone.
        if profile != EnvironmentProfile::NativeBridge {
            channels.insert(TriggerChannel::KeyboardMedia);
        }
        if profile == EnvironmentProfile::NativeBridge && !signals.display_standalone {
            channels.insert(TriggerChannel::FallbackButton);
        }

        Self {
            profile,
            display_standalone: signals.display_standalone,
            channels,
            geolocation: signals.geolocation,
            notifications: signals.notifications,
        }
    }

    pub fn has_channel(&self, channel: TriggerChannel) -> bool {
        self.channels.contains(&channel)
    }

    pub fn wants_fallback_button(&self) -> bool {
        self.has_channel(TriggerChannel::FallbackButton)
    }
}

/// An audio output device as enumerated by the host.
#[derive(Debug, Clone)]
pub struct AudioOutput {
    pub label: String,
}

/// Whether any output looks like a headset with a media button.
pub fn headset_connected(outputs: &[AudioOutput]) -> bool {
    outputs.iter().any(|device| {
        let label = device.label.to_lowercase();
        HEADSET_LABEL_PATTERNS.iter().any(|p| label.contains(p))
    })
}

/// Hint shown beside the SOS control.
pub fn sos_prompt(countdown: Option<u32>, profile: EnvironmentProfile, headset: bool) -> String {
    match countdown {
        Some(n) => format!("Emergency alert will activate in {}s...", n),
        None if profile == EnvironmentProfile::NativeBridge => "Press the red SOS button".to_string(),
        None if headset => "Press SOS or headphone button".to_string(),
        None => "Press and hold SOS button".to_string(),
    }
}
