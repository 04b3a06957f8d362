//! Resources the trigger layer places into the hosting view.
//!
//! The bridge script and the fallback control are acquired through a
//! [`UiHost`] and held as [`ScopedResource`]s, which hand them back to the
//! host when dropped. A failed mount therefore releases whatever it had
//! already acquired.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use tracing::debug;

use crate::utils::lock;

/// Handle to something the host created on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// The visible emergency control injected when no key path exists.
#[derive(Debug, Clone)]
pub struct FallbackControl {
    pub element_id: String,
    pub label: String,
}

/// The view hosting the trigger channels.
pub trait UiHost: Send + Sync {
    /// Load an external script by source URL.
    fn load_script(&self, src: &str) -> Result<ResourceId>;

    /// Add a visible control to the view.
    fn inject_control(&self, control: &FallbackControl) -> Result<ResourceId>;

    /// Remove a previously created resource.
    fn release(&self, id: ResourceId);
}

/// A host resource that is released on drop.
pub struct ScopedResource {
    host: Arc<dyn UiHost>,
    id: ResourceId,
    what: &'static str,
}

impl ScopedResource {
    pub fn new(host: Arc<dyn UiHost>, id: ResourceId, what: &'static str) -> Self {
        debug!(resource = what, id = id.0, "acquired host resource");
        Self { host, id, what }
    }
}

impl Drop for ScopedResource {
    fn drop(&mut self) {
        debug!(resource = self.what, id = self.id.0, "releasing host resource");
        self.host.release(self.id);
    }
}

/// In-process host with no real view: records what is live.
#[derive(Default)]
pub struct HeadlessHost {
    next_id: AtomicU64,
    live: Mutex<BTreeMap<ResourceId, String>>,
    /// Simulate a bridge script that fails to load.
    pub fail_scripts: AtomicBool,
    /// Simulate a view that refuses new controls.
    pub fail_controls: AtomicBool,
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, description: String) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.live).insert(id, description);
        id
    }

    /// Descriptions of resources currently held by the view.
    pub fn live(&self) -> Vec<String> {
        lock(&self.live).values().cloned().collect()
    }
}

impl UiHost for HeadlessHost {
    fn load_script(&self, src: &str) -> Result<ResourceId> {
        if self.fail_scripts.load(Ordering::Relaxed) {
            bail!("failed to fetch {}", src);
        }
        Ok(self.insert(format!("script {}", src)))
    }

    fn inject_control(&self, control: &FallbackControl) -> Result<ResourceId> {
        if self.fail_controls.load(Ordering::Relaxed) {
            bail!("view rejected control #{}", control.element_id);
        }
        Ok(self.insert(format!("control #{} [{}]", control.element_id, control.label)))
    }

    fn release(&self, id: ResourceId) {
        lock(&self.live).remove(&id);
    }
}
