use std::fmt;

use chrono::{DateTime, Local};

use super::LocationSample;

/// Alert state machine states.
///
/// State flow: Idle → Countdown(n) … Countdown(0) → Dispatched → Idle,
/// with Countdown(n > 0) → Cancelled → Idle on an explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    /// No emergency in progress.
    #[default]
    Idle,
    /// Confirmation window; dispatch happens when `remaining` hits zero.
    Countdown { remaining: u32 },
    /// Alert fanned out; confirmation is on screen.
    Dispatched,
    /// User aborted the countdown.
    Cancelled,
}

impl AlertState {
    /// Human-readable label for the current state.
    pub fn label(&self) -> &str {
        match self {
            AlertState::Idle => "Idle",
            AlertState::Countdown { .. } => "Countdown",
            AlertState::Dispatched => "ALERT SENT",
            AlertState::Cancelled => "Cancelled",
        }
    }

    /// Seconds left on the countdown, if one is running.
    pub fn seconds_remaining(&self) -> Option<u32> {
        match self {
            AlertState::Countdown { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertState::Countdown { remaining } => write!(f, "Countdown({})", remaining),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// One emergency episode, from activation until it returns to Idle.
#[derive(Debug, Clone)]
pub struct AlertSession {
    pub id: u64,
    pub state: AlertState,
    pub started_at: DateTime<Local>,
    pub location_snapshot: Option<LocationSample>,
}

impl AlertSession {
    pub fn start(id: u64, countdown_secs: u32) -> Self {
        Self {
            id,
            state: AlertState::Countdown {
                remaining: countdown_secs,
            },
            started_at: Local::now(),
            location_snapshot: None,
        }
    }
}
