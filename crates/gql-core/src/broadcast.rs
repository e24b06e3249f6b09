//! Dirty-tracking broadcast.
//!
//! State changes only mark records dirty; [`QueryManager::broadcast_queries`]
//! is the single flush step that notifies listeners, once per dirty cycle.

use tracing::warn;

use crate::manager::QueryManager;

impl QueryManager {
    /// Run the pre-broadcast hook, then call the listeners of every dirty
    /// operation with its store value and latest cache diff.
    ///
    /// Listener failures are logged and do not stop other listeners.
    pub fn broadcast_queries(&self) {
        if let Some(hook) = &self.inner.on_broadcast {
            hook();
        }

        let dirty = self.inner.registry.lock().take_dirty();
        for operation in dirty {
            for listener in &operation.listeners {
                if let Err(e) = listener(&operation.store, operation.diff.as_ref()) {
                    warn!(query_id = %operation.id, error = %e, "query listener failed");
                }
            }
        }
    }

    /// Mark operations dirty without broadcasting. Unknown ids are ignored.
    pub(crate) fn invalidate<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut registry = self.inner.registry.lock();
        for id in ids {
            registry.mark_dirty(id);
        }
    }
}
