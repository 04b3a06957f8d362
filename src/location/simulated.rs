//! Stand-in positioning backend for hosts without a GPS.
//!
//! Resolves to a configured coordinate after a fixed latency, or fails the
//! way a real platform would. Watch mode drifts the coordinate slightly on
//! every update so consecutive fixes are distinguishable. Without
//! `high_accuracy` the fix is as coarse as network positioning.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{LocationError, LocationResult, PositionOptions, PositionProvider};
use crate::constants::*;
use crate::models::LocationSample;

/// Failure a simulated provider reports instead of a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SimulatedFailure {
    /// The host has no positioning capability at all.
    Unsupported,
    PermissionDenied,
    PositionUnavailable,
    /// The request never resolves; the service's timeout fires.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub delay: Duration,
    pub watch_interval: Duration,
    pub failure: Option<SimulatedFailure>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_SIM_LATITUDE,
            longitude: DEFAULT_SIM_LONGITUDE,
            accuracy_meters: DEFAULT_SIM_ACCURACY_M,
            delay: Duration::from_millis(DEFAULT_SIM_DELAY_MS),
            watch_interval: Duration::from_millis(DEFAULT_WATCH_INTERVAL_MS),
            failure: None,
        }
    }
}

impl SimulatedProvider {
    fn fix(&self, step: u32, high_accuracy: bool) -> Option<LocationResult> {
        match self.failure {
            Some(SimulatedFailure::Unsupported) => Some(Err(LocationError::unsupported())),
            Some(SimulatedFailure::PermissionDenied) => Some(Err(LocationError::from_platform(
                GEO_CODE_PERMISSION_DENIED,
                "User denied Geolocation",
            ))),
            Some(SimulatedFailure::PositionUnavailable) => Some(Err(
                LocationError::from_platform(GEO_CODE_POSITION_UNAVAILABLE, "Position unavailable"),
            )),
            Some(SimulatedFailure::Timeout) => None,
            None => {
                let drift = SIM_WATCH_DRIFT_DEG * step as f64;
                let accuracy = if high_accuracy {
                    self.accuracy_meters
                } else {
                    self.accuracy_meters.max(SIM_COARSE_ACCURACY_M)
                };
                Some(Ok(LocationSample::new(
                    self.latitude + drift,
                    self.longitude + drift,
                    accuracy,
                )))
            }
        }
    }
}

#[async_trait]
impl PositionProvider for SimulatedProvider {
    async fn current_position(&self, options: &PositionOptions) -> LocationResult {
        tokio::time::sleep(self.delay).await;
        match self.fix(0, options.high_accuracy) {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn watch_position(&self, options: &PositionOptions) -> mpsc::UnboundedReceiver<LocationResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = self.clone();
        let timeout = options.timeout;
        let high_accuracy = options.high_accuracy;

        tokio::spawn(async move {
            let mut step = 0u32;
            loop {
                let wait = if step == 0 {
                    provider.delay
                } else {
                    provider.watch_interval
                };
                let update = match provider.fix(step, high_accuracy) {
                    Some(result) => {
                        tokio::time::sleep(wait).await;
                        result
                    }
                    // Platform watchers report a timeout per missed window.
                    None => {
                        tokio::time::sleep(timeout).await;
                        Err(LocationError::timeout("Timeout expired"))
                    }
                };
                if tx.send(update).is_err() {
                    break;
                }
                step = step.saturating_add(1);
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(failure: Option<SimulatedFailure>) -> SimulatedProvider {
        SimulatedProvider {
            latitude: 10.0,
            longitude: 20.0,
            accuracy_meters: 12.0,
            delay: Duration::from_millis(300),
            watch_interval: Duration::from_secs(1),
            failure,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_configured_fix() {
        let fix = provider(None)
            .current_position(&PositionOptions::default())
            .await
            .unwrap();
        assert_eq!(fix.latitude, 10.0);
        assert_eq!(fix.longitude, 20.0);
        assert_eq!(fix.accuracy_meters, 12.0);
    }

    #[tokio::test(start_paused = true)]
    async fn coarse_fix_without_high_accuracy() {
        let options = PositionOptions {
            high_accuracy: false,
            ..PositionOptions::default()
        };
        let fix = provider(None).current_position(&options).await.unwrap();
        assert_eq!(fix.accuracy_meters, SIM_COARSE_ACCURACY_M);

        let mut rx = provider(None).watch_position(&options);
        let update = rx.recv().await.unwrap().unwrap();
        assert_eq!(update.accuracy_meters, SIM_COARSE_ACCURACY_M);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_permission_denied() {
        let err = provider(Some(SimulatedFailure::PermissionDenied))
            .current_position(&PositionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), GEO_CODE_PERMISSION_DENIED);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_drifts_between_updates() {
        let mut rx = provider(None).watch_position(&PositionOptions::default());
        let first = rx.recv().await.unwrap().unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert!(second.latitude > first.latitude);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_reports_timeouts_when_hanging() {
        let mut rx = provider(Some(SimulatedFailure::Timeout)).watch_position(&PositionOptions::default());
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.code(), GEO_CODE_TIMEOUT);
    }
}
