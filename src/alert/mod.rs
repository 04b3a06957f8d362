//! Emergency alert state machine.
//!
//! State flow: Idle → Countdown(n) … Countdown(0) → Dispatched → Idle, with
//! Countdown(n > 0) → Cancelled → Idle on an explicit cancel.
//!
//! The machine runs as a single task that owns the live [`AlertSession`].
//! Trigger channels and the shell talk to it only through an [`AlertHandle`]
//! (commands in, state and [`AlertEvent`]s out), so every transition happens
//! in one place and in order.
//!
//! Activation starts a countdown and exactly one location fetch. The fetch
//! never blocks the countdown: whatever it has produced by Countdown(0) goes
//! into the alert, and anything arriving later is discarded.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::constants::{COUNTDOWN_TICK_MS, DEFAULT_CONFIRMATION_SECS, DEFAULT_COUNTDOWN_SECS};
use crate::contacts::{ContactSource, ProfileSource};
use crate::dispatch::{AlertDispatcher, ConfirmationReceipt};
use crate::errors::SafetyError;
use crate::location::{LocationResult, LocationService, SharedHistory};
use crate::models::{AlertSession, AlertState, LocationSample};
use crate::notifications::Notifier;
use crate::triggers::TriggerChannel;
use crate::utils::{format_timestamp, lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCommand {
    Activate(TriggerChannel),
    Cancel,
    Dismiss,
}

/// Observable output of the state machine, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    StateChanged { session_id: u64, state: AlertState },
    /// The session's location fetch resolved before dispatch.
    Located { session_id: u64, sample: LocationSample },
    Dispatched { session_id: u64, receipt: ConfirmationReceipt },
    /// User-visible, non-fatal condition.
    Notice { session_id: u64, error: SafetyError },
}

/// Countdown pacing.
#[derive(Debug, Clone, Copy)]
pub struct AlertTiming {
    pub countdown_secs: u32,
    pub tick: Duration,
    pub confirmation: Duration,
}

impl Default for AlertTiming {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            tick: Duration::from_millis(COUNTDOWN_TICK_MS),
            confirmation: Duration::from_secs(DEFAULT_CONFIRMATION_SECS),
        }
    }
}

/// Everything the machine reads from or reports to at dispatch time.
pub struct Collaborators {
    pub location: Arc<LocationService>,
    pub contacts: Arc<dyn ContactSource>,
    pub profile: Arc<dyn ProfileSource>,
    pub dispatcher: AlertDispatcher,
    pub notifier: Arc<dyn Notifier>,
    pub history: SharedHistory,
}

/// Cloneable handle to a running state machine.
#[derive(Clone)]
pub struct AlertHandle {
    commands: mpsc::UnboundedSender<AlertCommand>,
    state: watch::Receiver<AlertState>,
}

impl AlertHandle {
    /// Request activation. Dropped by the machine unless it is Idle.
    /// Returns false only if the machine has stopped.
    pub fn activate(&self, channel: TriggerChannel) -> bool {
        self.commands.send(AlertCommand::Activate(channel)).is_ok()
    }

    pub fn cancel(&self) -> bool {
        self.commands.send(AlertCommand::Cancel).is_ok()
    }

    /// Close the dispatch confirmation early.
    pub fn dismiss(&self) -> bool {
        self.commands.send(AlertCommand::Dismiss).is_ok()
    }

    /// Latest published state.
    pub fn state(&self) -> AlertState {
        *self.state.borrow()
    }
}

/// Start the state machine on the current runtime.
pub fn spawn(
    timing: AlertTiming,
    deps: Collaborators,
) -> (AlertHandle, mpsc::UnboundedReceiver<AlertEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(AlertState::Idle);

    let machine = AlertMachine {
        timing,
        deps,
        session: None,
        last_session_id: 0,
        ticker: None,
        confirmation: None,
        state_tx,
        events: event_tx,
    };
    tokio::spawn(machine.run(command_rx));

    (
        AlertHandle {
            commands: command_tx,
            state: state_rx,
        },
        event_rx,
    )
}

type FixSender = mpsc::UnboundedSender<(u64, LocationResult)>;

struct AlertMachine {
    timing: AlertTiming,
    deps: Collaborators,
    session: Option<AlertSession>,
    last_session_id: u64,
    ticker: Option<Interval>,
    confirmation: Option<Pin<Box<Sleep>>>,
    state_tx: watch::Sender<AlertState>,
    events: mpsc::UnboundedSender<AlertEvent>,
}

impl AlertMachine {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<AlertCommand>) {
        let (fix_tx, mut fixes) = mpsc::unbounded_channel();

        // Commands outrank a tick due at the same instant, so a cancel
        // queued before the deadline always lands.
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(AlertCommand::Activate(channel)) => self.activate(channel, &fix_tx),
                    Some(AlertCommand::Cancel) => self.cancel(),
                    Some(AlertCommand::Dismiss) => self.dismiss(),
                    None => break,
                },
                Some((session_id, result)) = fixes.recv() => self.on_fix(session_id, result),
                _ = next_tick(&mut self.ticker) => self.on_tick(),
                _ = confirmation_elapsed(&mut self.confirmation) => self.finish("confirmation window elapsed"),
            }
        }

        debug!("alert state machine stopped");
    }

    fn state(&self) -> AlertState {
        self.session.as_ref().map(|s| s.state).unwrap_or_default()
    }

    fn session_id(&self) -> u64 {
        self.session.as_ref().map(|s| s.id).unwrap_or(self.last_session_id)
    }

    fn emit(&self, event: AlertEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: AlertState) {
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        self.state_tx.send_replace(state);
        self.emit(AlertEvent::StateChanged {
            session_id: self.session_id(),
            state,
        });
    }

    fn activate(&mut self, channel: TriggerChannel, fixes: &FixSender) {
        if self.session.is_some() {
            debug!(%channel, state = %self.state(), "activation ignored, alert already in progress");
            return;
        }

        self.last_session_id += 1;
        let session_id = self.last_session_id;
        self.session = Some(AlertSession::start(session_id, self.timing.countdown_secs));
        info!(session_id, %channel, countdown_secs = self.timing.countdown_secs, "emergency countdown started");
        self.set_state(AlertState::Countdown {
            remaining: self.timing.countdown_secs,
        });

        let tick = self.timing.tick;
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        let location = Arc::clone(&self.deps.location);
        let fixes = fixes.clone();
        tokio::spawn(async move {
            let result = location.current_position().await;
            let _ = fixes.send((session_id, result));
        });

        if self.timing.countdown_secs == 0 {
            self.dispatch();
        }
    }

    fn on_tick(&mut self) {
        let Some(remaining) = self.state().seconds_remaining() else {
            self.ticker = None;
            return;
        };
        let remaining = remaining.saturating_sub(1);
        self.set_state(AlertState::Countdown { remaining });
        if remaining == 0 {
            self.dispatch();
        }
    }

    fn on_fix(&mut self, session_id: u64, result: LocationResult) {
        let counting = self
            .session
            .as_ref()
            .is_some_and(|s| s.id == session_id && s.state.seconds_remaining().is_some());
        if !counting {
            debug!(session_id, ok = result.is_ok(), "discarding location result for finished countdown");
            return;
        }

        match result {
            Ok(sample) => {
                info!(session_id, accuracy_m = sample.accuracy_meters, "location captured for alert");
                if let Some(session) = self.session.as_mut() {
                    session.location_snapshot = Some(sample.clone());
                }
                self.emit(AlertEvent::Located { session_id, sample });
            }
            Err(e) => {
                warn!(session_id, code = e.code(), message = e.message(), "location fetch failed, alert will go out without it");
                self.emit(AlertEvent::Notice {
                    session_id,
                    error: e.into(),
                });
            }
        }
    }

    /// Countdown reached zero: send with whatever snapshot exists now.
    fn dispatch(&mut self) {
        self.ticker = None;
        self.set_state(AlertState::Dispatched);

        let Some(session) = self.session.as_ref() else {
            return;
        };
        let session_id = session.id;

        if let Some(sample) = &session.location_snapshot {
            lock(&self.deps.history).record(sample.clone());
        }

        let contacts = self.deps.contacts.contacts();
        let user_name = self.deps.profile.display_name();
        match self
            .deps
            .dispatcher
            .dispatch(session, user_name.as_deref(), &contacts)
        {
            Ok(receipt) => {
                info!(
                    session_id,
                    sent = receipt.sent_count,
                    located = receipt.sample.is_some(),
                    started_at = %format_timestamp(&session.started_at),
                    "emergency alert dispatched"
                );
                self.deps.notifier.notify(&receipt);
                self.emit(AlertEvent::Dispatched {
                    session_id,
                    receipt,
                });
            }
            Err(error) => {
                warn!(session_id, kind = error.kind(), "emergency alert had no recipients");
                self.emit(AlertEvent::Notice { session_id, error });
            }
        }

        self.confirmation = Some(Box::pin(sleep(self.timing.confirmation)));
    }

    fn cancel(&mut self) {
        match self.state() {
            AlertState::Countdown { remaining } if remaining > 0 => {
                self.ticker = None;
                info!(session_id = self.session_id(), remaining, "emergency countdown cancelled");
                self.set_state(AlertState::Cancelled);
                self.set_state(AlertState::Idle);
                self.session = None;
            }
            state => debug!(%state, "cancel ignored"),
        }
    }

    fn dismiss(&mut self) {
        if self.state() == AlertState::Dispatched {
            self.finish("confirmation dismissed");
        } else {
            debug!(state = %self.state(), "dismiss ignored");
        }
    }

    fn finish(&mut self, reason: &'static str) {
        self.confirmation = None;
        if self.session.is_none() {
            return;
        }
        debug!(session_id = self.session_id(), reason, "alert session finished");
        self.set_state(AlertState::Idle);
        self.session = None;
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn confirmation_elapsed(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(deadline) => deadline.as_mut().await,
        None => pending().await,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::dispatch::testing::contact;
    use crate::location::testing::{sample, ManualProvider};
    use crate::location::LocationError;

    fn countdown(remaining: u32) -> AlertState {
        AlertState::Countdown { remaining }
    }

    fn expected_run() -> Vec<(AlertState, u64)> {
        vec![
            (countdown(5), 0),
            (countdown(4), 1),
            (countdown(3), 2),
            (countdown(2), 3),
            (countdown(1), 4),
            (countdown(0), 5),
            (AlertState::Dispatched, 5),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn five_ticks_one_second_apart_then_dispatch() {
        let mut h = harness(
            ManualProvider::resolving(sample(12.97, 77.59), Duration::from_secs(2)),
            vec![contact("1", "Asha"), contact("2", "Ben")],
        );

        let start = Instant::now();
        assert!(h.handle.activate(TriggerChannel::DirectPress));
        assert_eq!(states_until_dispatched(&mut h.events, start).await, expected_run());

        match next_event(&mut h.events).await {
            AlertEvent::Dispatched { receipt, .. } => {
                assert_eq!(receipt.sent_count, 2);
                assert_eq!(receipt.sample, Some(sample(12.97, 77.59)));
            }
            other => panic!("expected dispatch receipt, got {other:?}"),
        }
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.deliveries.deliveries().len(), 2);
        assert_eq!(lock(&h.notifier.shown).len(), 1);
        assert_eq!(lock(&h.history).latest(), Some(&sample(12.97, 77.59)));
    }

    #[tokio::test(start_paused = true)]
    async fn activations_while_busy_are_dropped() {
        let mut h = harness(
            ManualProvider::resolving(sample(1.0, 2.0), Duration::from_secs(1)),
            vec![contact("1", "Asha")],
        );

        let start = Instant::now();
        h.handle.activate(TriggerChannel::KeyboardMedia);
        h.handle.activate(TriggerChannel::BridgeMessage);
        h.handle.activate(TriggerChannel::FallbackButton);

        let mut seen = Vec::new();
        loop {
            let state = next_state(&mut h.events).await;
            seen.push(state);
            if state == countdown(3) {
                h.handle.activate(TriggerChannel::CustomActivation);
            }
            if state == AlertState::Dispatched {
                break;
            }
        }
        let expected: Vec<AlertState> = expected_run().into_iter().map(|(s, _)| s).collect();
        assert_eq!(seen, expected);

        // Still showing the confirmation: another press changes nothing.
        h.handle.activate(TriggerChannel::DirectPress);
        let dispatched_at = start.elapsed();
        assert_eq!(next_state(&mut h.events).await, AlertState::Idle);
        assert_secs(start.elapsed() - dispatched_at, 5);

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.deliveries.deliveries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_at_any_remaining_count_stops_ticking() {
        for cancel_at in 1..=5 {
            let mut h = harness(
                ManualProvider::resolving(sample(1.0, 2.0), Duration::from_secs(2)),
                vec![contact("1", "Asha")],
            );
            h.handle.activate(TriggerChannel::DirectPress);
            while next_state(&mut h.events).await != countdown(cancel_at) {}

            h.handle.cancel();
            assert_eq!(next_state(&mut h.events).await, AlertState::Cancelled);
            assert_eq!(next_state(&mut h.events).await, AlertState::Idle);

            tokio::time::sleep(Duration::from_secs(15)).await;
            assert!(
                h.events.try_recv().is_err(),
                "no events after cancelling at {cancel_at}"
            );
            assert_eq!(h.handle.state(), AlertState::Idle);
            assert!(h.deliveries.deliveries().is_empty());
            assert!(lock(&h.history).is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_sent_at_the_final_tick_deadline_wins() {
        for round in 0..50 {
            let mut h = harness(ManualProvider::hanging(), vec![contact("1", "Asha")]);
            h.handle.activate(TriggerChannel::DirectPress);
            while next_state(&mut h.events).await != countdown(1) {}

            // Wake exactly when the last tick is due.
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(h.handle.state(), countdown(1), "round {round}");
            h.handle.cancel();

            assert_eq!(next_state(&mut h.events).await, AlertState::Cancelled, "round {round}");
            assert_eq!(next_state(&mut h.events).await, AlertState::Idle, "round {round}");
            assert!(h.deliveries.deliveries().is_empty(), "round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cached_fix_is_not_recorded_twice() {
        let mut h = harness(
            ManualProvider::resolving(sample(1.0, 2.0), Duration::from_secs(1)),
            vec![contact("1", "Asha")],
        );
        for _ in 0..2 {
            let start = Instant::now();
            h.handle.activate(TriggerChannel::DirectPress);
            states_until_dispatched(&mut h.events, start).await;
            h.handle.dismiss();
            while next_state(&mut h.events).await != AlertState::Idle {}
        }

        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.deliveries.deliveries().len(), 2);
        assert_eq!(lock(&h.history).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_dispatch_is_a_no_op() {
        let mut h = harness(ManualProvider::hanging(), vec![contact("1", "Asha")]);
        let start = Instant::now();
        h.handle.activate(TriggerChannel::DirectPress);
        states_until_dispatched(&mut h.events, start).await;

        h.handle.cancel();
        assert_eq!(next_state(&mut h.events).await, AlertState::Idle);
        assert_secs(start.elapsed(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_idle_is_a_no_op() {
        let mut h = harness(ManualProvider::hanging(), vec![]);
        h.handle.cancel();
        h.handle.dismiss();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.handle.state(), AlertState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_contacts_still_dispatches_with_notice() {
        let mut h = harness(
            ManualProvider::resolving(sample(1.0, 2.0), Duration::from_millis(500)),
            vec![],
        );
        let start = Instant::now();
        h.handle.activate(TriggerChannel::DirectPress);
        assert_eq!(states_until_dispatched(&mut h.events, start).await, expected_run());

        assert_eq!(
            next_event(&mut h.events).await,
            AlertEvent::Notice {
                session_id: 1,
                error: SafetyError::NoContactsConfigured
            }
        );
        assert_eq!(h.handle.state(), AlertState::Dispatched);
        assert!(lock(&h.notifier.shown).is_empty());
        assert_eq!(next_state(&mut h.events).await, AlertState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn late_fix_is_discarded() {
        let mut h = harness(
            ManualProvider::resolving(sample(1.0, 2.0), Duration::from_secs(7)),
            vec![contact("1", "Asha")],
        );
        let start = Instant::now();
        h.handle.activate(TriggerChannel::DirectPress);
        states_until_dispatched(&mut h.events, start).await;

        match next_event(&mut h.events).await {
            AlertEvent::Dispatched { receipt, .. } => assert_eq!(receipt.sample, None),
            other => panic!("expected dispatch receipt, got {other:?}"),
        }
        // The fix lands at 7s, inside the confirmation window.
        assert_eq!(next_state(&mut h.events).await, AlertState::Idle);
        assert!(h.events.try_recv().is_err());
        assert!(lock(&h.history).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn location_failure_is_a_notice_not_a_blocker() {
        let mut h = harness(
            ManualProvider::failing(
                LocationError::from_platform(1, "User denied Geolocation"),
                Duration::from_secs(1),
            ),
            vec![contact("1", "Asha")],
        );
        let start = Instant::now();
        h.handle.activate(TriggerChannel::DirectPress);

        let mut notice = None;
        let mut receipt = None;
        while receipt.is_none() {
            match next_event(&mut h.events).await {
                AlertEvent::Notice { error, .. } => notice = Some(error),
                AlertEvent::Dispatched { receipt: r, .. } => receipt = Some(r),
                _ => {}
            }
        }
        assert_secs(start.elapsed(), 5);
        assert_eq!(notice.map(|e| e.kind()), Some("LocationPermissionDenied"));
        assert_eq!(receipt.map(|r| r.sample), Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_returns_to_idle_early_and_allows_a_new_session() {
        let mut h = harness(
            ManualProvider::resolving(sample(1.0, 2.0), Duration::ZERO),
            vec![contact("1", "Asha")],
        );
        let start = Instant::now();
        h.handle.activate(TriggerChannel::DirectPress);
        states_until_dispatched(&mut h.events, start).await;

        h.handle.dismiss();
        assert_eq!(next_state(&mut h.events).await, AlertState::Idle);
        assert_secs(start.elapsed(), 5);

        h.handle.activate(TriggerChannel::DirectPress);
        loop {
            if let AlertEvent::StateChanged { session_id, state } = next_event(&mut h.events).await {
                assert_eq!(session_id, 2);
                assert_eq!(state, countdown(5));
                break;
            }
        }
        // The second fetch is served from the fix cache.
        assert_eq!(h.provider.calls(), 1);
    }
}
