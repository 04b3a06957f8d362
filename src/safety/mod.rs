//! Discreet safety tools: a simulated incoming call and the Safe Mode switch.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{FAKE_CALL_CONNECT_SECS, SAFE_MODE_OFF_NOTICE, SAFE_MODE_ON_NOTICE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Calling,
    Connected,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Calling => write!(f, "Calling..."),
            CallStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// A simulated incoming call. Rings for a couple of seconds, then shows
/// as connected with a running duration. Nobody is actually called.
#[derive(Debug, Clone)]
pub struct FakeCall {
    caller: String,
    started: Instant,
}

impl FakeCall {
    pub fn start(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            started: Instant::now(),
        }
    }

    pub fn connects_at(&self) -> Instant {
        self.started + Duration::from_secs(FAKE_CALL_CONNECT_SECS)
    }

    pub fn status(&self) -> CallStatus {
        if Instant::now() >= self.connects_at() {
            CallStatus::Connected
        } else {
            CallStatus::Calling
        }
    }

    /// Time since the call started, ringing included.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn display(&self) -> String {
        match self.status() {
            CallStatus::Calling => format!("📞 {}  {}", self.caller, CallStatus::Calling),
            CallStatus::Connected => format!(
                "📞 {}  {}  {}",
                self.caller,
                CallStatus::Connected,
                format_call_duration(self.elapsed())
            ),
        }
    }
}

/// `mm:ss`, minutes unbounded.
pub fn format_call_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[derive(Debug, Default)]
pub struct SafeMode {
    active: bool,
}

impl SafeMode {
    /// Flip the mode and return the new value.
    pub fn toggle(&mut self) -> bool {
        self.active = !self.active;
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn notice(&self) -> &'static str {
        if self.active {
            SAFE_MODE_ON_NOTICE
        } else {
            SAFE_MODE_OFF_NOTICE
        }
    }
}
