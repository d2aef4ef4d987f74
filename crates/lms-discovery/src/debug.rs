//! Routing of internal trace lines to an optional user callback.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Callback receiving formatted internal trace lines.
pub type DebugCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink for internal trace lines.
///
/// Lines always go to `tracing` at debug level. When enabled with a
/// callback, the formatted line is additionally handed to the callback,
/// which lets embedders capture traces without wiring up a subscriber.
#[derive(Default)]
pub(crate) struct DebugSink {
    enabled: AtomicBool,
    callback: RwLock<Option<DebugCallback>>,
}

impl DebugSink {
    pub fn configure(&self, enabled: bool, callback: Option<DebugCallback>) {
        self.enabled.store(enabled, Ordering::Relaxed);
        *self.callback.write() = callback;
    }

    pub fn trace(&self, line: &str) {
        debug!(target: "lms_discovery", "{line}");
        if self.enabled.load(Ordering::Relaxed) {
            if let Some(callback) = self.callback.read().as_ref() {
                callback(line);
            }
        }
    }
}
