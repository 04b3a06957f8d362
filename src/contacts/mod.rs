//! Contact list and profile collaborators.
//!
//! The alert core only reads through [`ContactSource`] and [`ProfileSource`].
//! [`ContactStore`] is the file-backed implementation used by the binary:
//! a JSON array at `~/.local/share/safeguard/contacts.json`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::models::{Contact, NewContact};
use crate::utils::lock;

/// Read-only view of the configured emergency contacts, in order.
pub trait ContactSource: Send + Sync {
    fn contacts(&self) -> Vec<Contact>;
}

impl ContactSource for Vec<Contact> {
    fn contacts(&self) -> Vec<Contact> {
        self.clone()
    }
}

/// Supplies the current user's display name.
pub trait ProfileSource: Send + Sync {
    fn display_name(&self) -> Option<String>;
}

/// Profile whose name is fixed at startup (from config or CLI).
pub struct StaticProfile {
    name: Option<String>,
}

impl StaticProfile {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }
}

impl ProfileSource for StaticProfile {
    fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}

/// JSON-file contact list.
pub struct ContactStore {
    path: PathBuf,
    contacts: Mutex<Vec<Contact>>,
}

impl ContactStore {
    /// Open the store, starting empty if the file is missing. An unreadable
    /// file is reported and treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let contacts = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(list) => list,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "contact file unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            contacts: Mutex::new(contacts),
        }
    }

    pub fn list(&self) -> Vec<Contact> {
        lock(&self.contacts).clone()
    }

    /// Append a contact. Ids come from the creation time in milliseconds,
    /// bumped until unique. Memory is only updated once the file is written.
    pub fn add(&self, contact: NewContact) -> Result<Contact> {
        let mut contacts = lock(&self.contacts);
        let mut stamp = chrono::Utc::now().timestamp_millis();
        while contacts.iter().any(|c| c.id == stamp.to_string()) {
            stamp += 1;
        }
        let contact = contact.into_contact(stamp.to_string());

        let mut updated = contacts.clone();
        updated.push(contact.clone());
        self.persist(&updated)?;
        *contacts = updated;

        info!(id = %contact.id, name = %contact.name, "contact added");
        Ok(contact)
    }

    /// Remove by id. Returns whether a contact was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut contacts = lock(&self.contacts);
        if !contacts.iter().any(|c| c.id == id) {
            return Ok(false);
        }

        let updated: Vec<Contact> = contacts.iter().filter(|c| c.id != id).cloned().collect();
        self.persist(&updated)?;
        *contacts = updated;

        info!(id, "contact removed");
        Ok(true)
    }

    fn persist(&self, contacts: &[Contact]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(contacts)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

impl ContactSource for ContactStore {
    fn contacts(&self) -> Vec<Contact> {
        self.list()
    }
}
