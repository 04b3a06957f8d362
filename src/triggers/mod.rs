//! Trigger aggregation.
//!
//! Five independent input channels can raise an activation. Each raw input
//! is decoded at the channel boundary into either an activation for the
//! alert state machine or a typed [`IgnoreReason`]; nothing untyped travels
//! further. Debouncing is the state machine's job: the aggregator forwards
//! every recognized activation.

pub mod bridge;
pub mod host;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::alert::AlertHandle;
use crate::constants::*;
use crate::environment::Capabilities;
use crate::errors::SafetyError;
use host::{FallbackControl, ScopedResource, UiHost};

/// An input path that can raise an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerChannel {
    /// Media play/pause (or the fallback key) on a keyboard or headset.
    KeyboardMedia,
    /// Cross-context message from the embedding shell.
    BridgeMessage,
    /// Synthetic event raised by the bridge script.
    CustomActivation,
    /// The on-screen SOS control.
    DirectPress,
    /// Injected floating control for native shells.
    FallbackButton,
}

impl fmt::Display for TriggerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerChannel::KeyboardMedia => write!(f, "keyboard-media"),
            TriggerChannel::BridgeMessage => write!(f, "bridge-message"),
            TriggerChannel::CustomActivation => write!(f, "custom-activation"),
            TriggerChannel::DirectPress => write!(f, "direct-press"),
            TriggerChannel::FallbackButton => write!(f, "fallback-button"),
        }
    }
}

/// A key-down as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyInput {
    /// Physical key code, e.g. `MediaPlayPause`.
    pub code: String,
    /// Produced key value, e.g. `" "`.
    pub key: String,
    /// Legacy numeric key code.
    pub key_code: u32,
}

impl KeyInput {
    pub fn media_play_pause() -> Self {
        Self {
            code: MEDIA_PLAY_PAUSE_CODE.to_string(),
            key: MEDIA_PLAY_PAUSE_CODE.to_string(),
            key_code: MEDIA_PLAY_PAUSE_KEY_CODE,
        }
    }

    pub fn space() -> Self {
        Self {
            code: "Space".to_string(),
            key: FALLBACK_ACTIVATION_KEY.to_string(),
            key_code: 32,
        }
    }

    /// Shell shorthand: `media`, `space`, a numeric key code, or a key code
    /// name.
    pub fn from_token(token: &str) -> Self {
        match token {
            "media" => Self::media_play_pause(),
            "space" => Self::space(),
            other => match other.parse::<u32>() {
                Ok(key_code) => Self {
                    key_code,
                    ..Self::default()
                },
                Err(_) => Self {
                    code: other.to_string(),
                    key: other.to_string(),
                    key_code: 0,
                },
            },
        }
    }

    /// Whether this key should activate.
    pub fn is_activation(&self) -> bool {
        self.code == MEDIA_PLAY_PAUSE_CODE
            || self.key == FALLBACK_ACTIVATION_KEY
            || self.key_code == MEDIA_PLAY_PAUSE_KEY_CODE
    }
}

/// Raw input arriving on one of the channels.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    Key(KeyInput),
    /// Untyped cross-context payload (JSON text).
    Message(String),
    /// A named synthetic event.
    CustomEvent(String),
    Press,
    FallbackClick,
}

impl ChannelInput {
    pub fn channel(&self) -> TriggerChannel {
        match self {
            ChannelInput::Key(_) => TriggerChannel::KeyboardMedia,
            ChannelInput::Message(_) => TriggerChannel::BridgeMessage,
            ChannelInput::CustomEvent(_) => TriggerChannel::CustomActivation,
            ChannelInput::Press => TriggerChannel::DirectPress,
            ChannelInput::FallbackClick => TriggerChannel::FallbackButton,
        }
    }
}

/// Why an input did not become an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The channel is not wired up in this environment.
    NotRegistered(TriggerChannel),
    UnrecognizedKey,
    UnrecognizedMessage,
    UnrecognizedEvent,
    /// The alert state machine is no longer running.
    StateMachineStopped,
}

/// Outcome of delivering one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Forwarded to the state machine. `suppress_default` tells the host to
    /// cancel the input's default action (page scroll on space, etc).
    Activated {
        channel: TriggerChannel,
        suppress_default: bool,
    },
    Ignored(IgnoreReason),
}

/// Wires the channels allowed by the environment to an alert state machine.
pub struct TriggerAggregator {
    capabilities: Capabilities,
    alert: AlertHandle,
}

impl TriggerAggregator {
    pub fn new(capabilities: Capabilities, alert: AlertHandle) -> Self {
        Self {
            capabilities,
            alert,
        }
    }

    /// Register the channels and acquire their host resources.
    ///
    /// A bridge script that fails to load does not fail the mount: the
    /// other channels still work, and the failure is reported through
    /// [`MountedTriggers::warnings`]. Failing to inject the fallback control
    /// is an error, and releases anything already acquired.
    pub fn mount(&self, host: Arc<dyn UiHost>) -> Result<MountedTriggers> {
        let mut warnings = Vec::new();

        let bridge_script = match host.load_script(BRIDGE_SCRIPT_SRC) {
            Ok(id) => Some(ScopedResource::new(host.clone(), id, "bridge script")),
            Err(e) => {
                let warning = SafetyError::BridgeResourceUnavailable {
                    source_url: BRIDGE_SCRIPT_SRC.to_string(),
                    reason: format!("{:#}", e),
                };
                warn!(src = BRIDGE_SCRIPT_SRC, error = %e, "bridge script unavailable, headset bridge disabled");
                warnings.push(warning);
                None
            }
        };

        let fallback_control = if self.capabilities.wants_fallback_button() {
            let control = FallbackControl {
                element_id: FALLBACK_BUTTON_ID.to_string(),
                label: FALLBACK_BUTTON_LABEL.to_string(),
            };
            let id = host
                .inject_control(&control)
                .context("injecting emergency fallback control")?;
            Some(ScopedResource::new(host.clone(), id, "fallback control"))
        } else {
            None
        };

        info!(
            profile = %self.capabilities.profile,
            channels = ?self.capabilities.channels,
            bridge_script = bridge_script.is_some(),
            "trigger channels mounted"
        );

        Ok(MountedTriggers {
            channels: self.capabilities.channels.clone(),
            alert: self.alert.clone(),
            warnings,
            _bridge_script: bridge_script,
            _fallback_control: fallback_control,
        })
    }
}

/// Live channel registration. Dropping it unregisters every channel and
/// returns the host resources.
pub struct MountedTriggers {
    channels: BTreeSet<TriggerChannel>,
    alert: AlertHandle,
    warnings: Vec<SafetyError>,
    _bridge_script: Option<ScopedResource>,
    _fallback_control: Option<ScopedResource>,
}

impl MountedTriggers {
    pub fn channels(&self) -> &BTreeSet<TriggerChannel> {
        &self.channels
    }

    pub fn is_registered(&self, channel: TriggerChannel) -> bool {
        self.channels.contains(&channel)
    }

    /// Non-fatal problems found while mounting.
    pub fn warnings(&self) -> &[SafetyError] {
        &self.warnings
    }

    /// Decode one raw input and forward it if it is an activation.
    pub fn deliver(&self, input: ChannelInput) -> Delivery {
        let channel = input.channel();
        if !self.is_registered(channel) {
            debug!(%channel, "input on unregistered channel ignored");
            return Delivery::Ignored(IgnoreReason::NotRegistered(channel));
        }

        let suppress_default = match &input {
            ChannelInput::Key(key) if key.is_activation() => true,
            ChannelInput::Key(_) => return Delivery::Ignored(IgnoreReason::UnrecognizedKey),
            ChannelInput::Message(payload) => match bridge::decode(payload) {
                Some(bridge::BridgeMessage::ButtonPress) => false,
                None => {
                    debug!(payload = %crate::utils::truncate_str(payload, 80), "bridge message ignored");
                    return Delivery::Ignored(IgnoreReason::UnrecognizedMessage);
                }
            },
            ChannelInput::CustomEvent(name) if name == CUSTOM_ACTIVATION_EVENT => false,
            ChannelInput::CustomEvent(_) => {
                return Delivery::Ignored(IgnoreReason::UnrecognizedEvent)
            }
            ChannelInput::Press | ChannelInput::FallbackClick => false,
        };

        if !self.alert.activate(channel) {
            warn!(%channel, "activation lost, alert state machine stopped");
            return Delivery::Ignored(IgnoreReason::StateMachineStopped);
        }
        debug!(%channel, "activation forwarded");
        Delivery::Activated {
            channel,
            suppress_default,
        }
    }
}

impl Drop for MountedTriggers {
    fn drop(&mut self) {
        debug!(channels = self.channels.len(), "trigger channels unmounted");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::host::HeadlessHost;
    use super::*;
    use crate::alert::testing::{harness, next_event, states_until_dispatched, Harness};
    use crate::alert::AlertEvent;
    use crate::dispatch::testing::contact;
    use crate::environment::{EnvironmentProfile, RuntimeSignals};
    use crate::location::testing::{sample, ManualProvider};
    use crate::models::AlertState;

    const NATIVE_UA: &str = "Mozilla/5.0 (Linux; Android 13) AppCreatorWebView/4.2";

    fn capabilities(identity: &str, standalone: bool) -> Capabilities {
        Capabilities::detect(&RuntimeSignals {
            identity: identity.to_string(),
            display_standalone: standalone,
            ..RuntimeSignals::default()
        })
    }

    fn harness_with(provider: ManualProvider) -> Harness {
        harness(provider, vec![contact("1", "Asha")])
    }

    #[tokio::test]
    async fn browser_registers_keyboard_but_not_fallback() {
        let h = harness_with(ManualProvider::hanging());
        let host = Arc::new(HeadlessHost::new());
        let mounted = TriggerAggregator::new(capabilities("Mozilla/5.0", false), h.handle.clone())
            .mount(host.clone())
            .unwrap();

        assert!(mounted.is_registered(TriggerChannel::KeyboardMedia));
        assert!(!mounted.is_registered(TriggerChannel::FallbackButton));
        assert_eq!(host.live(), vec!["script /bluetooth-bridge.js".to_string()]);
        assert_eq!(
            mounted.deliver(ChannelInput::FallbackClick),
            Delivery::Ignored(IgnoreReason::NotRegistered(TriggerChannel::FallbackButton))
        );
    }

    #[tokio::test]
    async fn activation_keys_suppress_their_default_action() {
        let h = harness_with(ManualProvider::hanging());
        let mounted = TriggerAggregator::new(capabilities("Mozilla/5.0", false), h.handle.clone())
            .mount(Arc::new(HeadlessHost::new()))
            .unwrap();

        for key in [
            KeyInput::media_play_pause(),
            KeyInput::space(),
            KeyInput::from_token("179"),
        ] {
            assert_eq!(
                mounted.deliver(ChannelInput::Key(key)),
                Delivery::Activated {
                    channel: TriggerChannel::KeyboardMedia,
                    suppress_default: true
                }
            );
        }
        assert_eq!(
            mounted.deliver(ChannelInput::Key(KeyInput::from_token("KeyA"))),
            Delivery::Ignored(IgnoreReason::UnrecognizedKey)
        );
    }

    #[tokio::test]
    async fn bridge_messages_other_than_button_press_never_activate() {
        let mut h = harness_with(ManualProvider::hanging());
        let mounted = TriggerAggregator::new(capabilities("Mozilla/5.0", false), h.handle.clone())
            .mount(Arc::new(HeadlessHost::new()))
            .unwrap();

        assert_eq!(
            mounted.deliver(ChannelInput::Message(r#"{"type":"other"}"#.to_string())),
            Delivery::Ignored(IgnoreReason::UnrecognizedMessage)
        );
        assert_eq!(
            mounted.deliver(ChannelInput::CustomEvent("click".to_string())),
            Delivery::Ignored(IgnoreReason::UnrecognizedEvent)
        );
        tokio::task::yield_now().await;
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.handle.state(), AlertState::Idle);

        assert!(matches!(
            mounted.deliver(ChannelInput::Message(
                r#"{"type":"bluetoothButtonPress"}"#.to_string()
            )),
            Delivery::Activated {
                channel: TriggerChannel::BridgeMessage,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut h.events).await,
            AlertEvent::StateChanged {
                state: AlertState::Countdown { remaining: 5 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_bridge_script_is_a_warning() {
        let h = harness_with(ManualProvider::hanging());
        let host = Arc::new(HeadlessHost::new());
        host.fail_scripts.store(true, Ordering::Relaxed);

        let mounted = TriggerAggregator::new(capabilities(NATIVE_UA, false), h.handle.clone())
            .mount(host.clone())
            .unwrap();

        assert_eq!(mounted.warnings().len(), 1);
        assert_eq!(mounted.warnings()[0].kind(), "BridgeResourceUnavailable");
        assert!(mounted.is_registered(TriggerChannel::FallbackButton));
        assert_eq!(host.live().len(), 1, "fallback control still injected");
    }

    #[tokio::test]
    async fn failed_fallback_injection_releases_the_bridge_script() {
        let h = harness_with(ManualProvider::hanging());
        let host = Arc::new(HeadlessHost::new());
        host.fail_controls.store(true, Ordering::Relaxed);

        let result = TriggerAggregator::new(capabilities(NATIVE_UA, false), h.handle.clone())
            .mount(host.clone());

        assert!(result.is_err());
        assert!(host.live().is_empty());
    }

    #[tokio::test]
    async fn unmount_releases_host_resources() {
        let h = harness_with(ManualProvider::hanging());
        let host = Arc::new(HeadlessHost::new());
        let mounted = TriggerAggregator::new(capabilities(NATIVE_UA, false), h.handle.clone())
            .mount(host.clone())
            .unwrap();
        assert_eq!(host.live().len(), 2);

        drop(mounted);
        assert!(host.live().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn native_fallback_press_dispatches_with_location() {
        let caps = capabilities(NATIVE_UA, false);
        assert_eq!(caps.profile, EnvironmentProfile::NativeBridge);

        let mut h = harness_with(ManualProvider::resolving(
            sample(12.9716, 77.5946),
            Duration::from_secs(3),
        ));
        let mounted = TriggerAggregator::new(caps, h.handle.clone())
            .mount(Arc::new(HeadlessHost::new()))
            .unwrap();
        assert!(mounted.is_registered(TriggerChannel::FallbackButton));
        assert!(!mounted.is_registered(TriggerChannel::KeyboardMedia));

        let start = Instant::now();
        mounted.deliver(ChannelInput::FallbackClick);
        let states = states_until_dispatched(&mut h.events, start).await;
        assert_eq!(states.first(), Some(&(AlertState::Countdown { remaining: 5 }, 0)));
        assert_eq!(states.last(), Some(&(AlertState::Dispatched, 5)));
        assert_eq!(states.len(), 7);

        match next_event(&mut h.events).await {
            AlertEvent::Dispatched { receipt, .. } => {
                assert_eq!(receipt.sample, Some(sample(12.9716, 77.5946)))
            }
            other => panic!("expected dispatch receipt, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn native_fallback_press_dispatches_without_location_when_fix_hangs() {
        let mut h = harness_with(ManualProvider::hanging());
        let mounted = TriggerAggregator::new(capabilities(NATIVE_UA, false), h.handle.clone())
            .mount(Arc::new(HeadlessHost::new()))
            .unwrap();

        let start = Instant::now();
        mounted.deliver(ChannelInput::FallbackClick);
        let states = states_until_dispatched(&mut h.events, start).await;
        assert_eq!(states.last(), Some(&(AlertState::Dispatched, 5)));

        match next_event(&mut h.events).await {
            AlertEvent::Dispatched { receipt, .. } => assert_eq!(receipt.sample, None),
            other => panic!("expected dispatch receipt, got {other:?}"),
        }
    }
}
