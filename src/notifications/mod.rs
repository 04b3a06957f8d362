//! Local system notifications raised after an alert goes out.
//!
//! Best-effort only: when the host has not granted permission nothing is
//! shown and the alert flow is unaffected. Rate-limited to one notification
//! per alert kind per cooldown window so a burst of quick alerts does not
//! stack banners.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::constants::NOTIFICATION_COOLDOWN_SECS;
use crate::dispatch::{AlertKind, ConfirmationReceipt};
use crate::environment::NotificationPermission;
use crate::utils::lock;

/// Raises a notification. Returns whether one was actually shown.
pub trait Notifier: Send + Sync {
    fn notify(&self, receipt: &ConfirmationReceipt) -> bool;
}

/// Title and body for a sent alert. Silent alerts never notify.
pub fn notification_for(receipt: &ConfirmationReceipt) -> Option<(&'static str, String)> {
    match receipt.kind {
        AlertKind::Emergency => Some((
            "Emergency Alert Sent",
            format!("Alert sent to {} emergency contacts", receipt.sent_count),
        )),
        AlertKind::Group => Some((
            "Group Emergency Alert Sent",
            format!("Alert sent to all {} emergency contacts", receipt.sent_count),
        )),
        AlertKind::Silent => None,
    }
}

/// Notifier backed by the host's notification permission. Shown
/// notifications are emitted as log events under the `notification` target.
pub struct SystemNotifier {
    permission: NotificationPermission,
    last_shown: Mutex<HashMap<AlertKind, Instant>>,
    cooldown: Duration,
}

impl SystemNotifier {
    pub fn new(permission: NotificationPermission) -> Self {
        Self {
            permission,
            last_shown: Mutex::new(HashMap::new()),
            cooldown: Duration::from_secs(NOTIFICATION_COOLDOWN_SECS),
        }
    }

    fn can_show(&self, kind: AlertKind) -> bool {
        match lock(&self.last_shown).get(&kind) {
            Some(last) => last.elapsed() >= self.cooldown,
            None => true,
        }
    }
}

impl Notifier for SystemNotifier {
    fn notify(&self, receipt: &ConfirmationReceipt) -> bool {
        if self.permission != NotificationPermission::Granted {
            debug!(permission = ?self.permission, "notification skipped: not permitted");
            return false;
        }
        let Some((title, body)) = notification_for(receipt) else {
            return false;
        };
        if !self.can_show(receipt.kind) {
            debug!(kind = %receipt.kind, "notification skipped: cooling down");
            return false;
        }

        info!(target: "notification", title, body = %body);
        lock(&self.last_shown).insert(receipt.kind, Instant::now());
        true
    }
}
