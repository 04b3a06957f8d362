//! Alert formatting and fan-out to emergency contacts.
//!
//! The dispatcher builds one [`AlertMessage`] per alert and hands it to a
//! [`DeliveryChannel`] once per contact, in list order. There are no retries;
//! each delivery is a single attempt. The returned [`ConfirmationReceipt`]
//! backs the post-dispatch confirmation and is never persisted.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::constants::DEFAULT_USER_NAME;
use crate::errors::SafetyError;
use crate::models::{AlertSession, Contact, LocationSample};
use crate::utils::format_timestamp;

/// What kind of alert is going out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// Countdown-gated SOS.
    Emergency,
    /// Sent immediately, no notification on this device.
    Silent,
    /// Sent immediately to every contact, with a local notification.
    Group,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Emergency => write!(f, "emergency"),
            AlertKind::Silent => write!(f, "silent"),
            AlertKind::Group => write!(f, "group"),
        }
    }
}

/// Formatted alert payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub kind: AlertKind,
    pub body: String,
    pub sent_at: DateTime<Local>,
}

impl AlertMessage {
    pub fn compose(
        kind: AlertKind,
        user_name: Option<&str>,
        sample: Option<&LocationSample>,
        sent_at: DateTime<Local>,
    ) -> Self {
        let name = user_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_USER_NAME);
        let link = sample.map(LocationSample::map_link);

        let body = match kind {
            AlertKind::Emergency => format!(
                "🚨 EMERGENCY ALERT from {}\n📍 Location: {}\n⏰ Time: {}",
                name,
                link.as_deref().unwrap_or("Unable to determine location"),
                format_timestamp(&sent_at)
            ),
            AlertKind::Silent => format!(
                "SILENT EMERGENCY ALERT: {} may need assistance. Location: {}",
                name,
                link.as_deref().unwrap_or("Location unavailable")
            ),
            AlertKind::Group => format!(
                "GROUP EMERGENCY ALERT: {} needs immediate help! Location: {}",
                name,
                link.as_deref().unwrap_or("Location unavailable")
            ),
        };

        Self {
            kind,
            body,
            sent_at,
        }
    }
}

/// Outcome of a successful fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationReceipt {
    pub kind: AlertKind,
    pub sent_count: usize,
    pub sample: Option<LocationSample>,
    pub sent_at: DateTime<Local>,
}

/// Where a formatted alert goes for one contact.
pub trait DeliveryChannel: Send + Sync {
    fn deliver(&self, contact: &Contact, message: &AlertMessage);
}

/// Delivers by writing one structured log event per contact.
pub struct LogDelivery;

impl DeliveryChannel for LogDelivery {
    fn deliver(&self, contact: &Contact, message: &AlertMessage) {
        info!(
            kind = %message.kind,
            contact_id = %contact.id,
            contact = %contact.name,
            phone = %contact.phone,
            body = %message.body,
            "alert delivered"
        );
    }
}

#[derive(Clone)]
pub struct AlertDispatcher {
    channel: Arc<dyn DeliveryChannel>,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn DeliveryChannel>) -> Self {
        Self { channel }
    }

    /// Send the emergency alert for a session that reached the end of its
    /// countdown, using whatever snapshot it captured.
    pub fn dispatch(
        &self,
        session: &AlertSession,
        user_name: Option<&str>,
        contacts: &[Contact],
    ) -> Result<ConfirmationReceipt, SafetyError> {
        self.send(
            AlertKind::Emergency,
            user_name,
            session.location_snapshot.as_ref(),
            contacts,
        )
    }

    pub fn send(
        &self,
        kind: AlertKind,
        user_name: Option<&str>,
        sample: Option<&LocationSample>,
        contacts: &[Contact],
    ) -> Result<ConfirmationReceipt, SafetyError> {
        if contacts.is_empty() {
            warn!(%kind, "alert not sent: no emergency contacts configured");
            return Err(SafetyError::NoContactsConfigured);
        }

        let message = AlertMessage::compose(kind, user_name, sample, Local::now());
        for contact in contacts {
            self.channel.deliver(contact, &message);
        }
        info!(%kind, sent = contacts.len(), located = sample.is_some(), "alert fan-out complete");

        Ok(ConfirmationReceipt {
            kind,
            sent_count: contacts.len(),
            sample: sample.cloned(),
            sent_at: message.sent_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::utils::lock;

    /// Records every delivery as `(contact id, message)`.
    #[derive(Default)]
    pub struct RecordingDelivery {
        deliveries: Mutex<Vec<(String, AlertMessage)>>,
    }

    impl RecordingDelivery {
        pub fn deliveries(&self) -> Vec<(String, AlertMessage)> {
            lock(&self.deliveries).clone()
        }
    }

    impl DeliveryChannel for RecordingDelivery {
        fn deliver(&self, contact: &Contact, message: &AlertMessage) {
            lock(&self.deliveries).push((contact.id.clone(), message.clone()));
        }
    }

    pub fn contact(id: &str, name: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: name.to_string(),
            phone: "+91 90000 00000".to_string(),
            relationship: "Sibling".to_string(),
        }
    }
}
