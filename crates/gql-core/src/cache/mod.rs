//! The cache contract consumed by the client core.
//!
//! The core never normalizes or stores data itself. It reads through
//! [`Cache::diff`], writes through [`Cache::write`], observes through
//! [`Cache::watch`], and groups writes with the transaction methods.
//! [`InMemoryCache`] is a small reference implementation.

mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use gql_types::{Document, Variables};

pub use memory::{EntryKey, InMemoryCache};

/// Read request for [`Cache::diff`].
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub document: Document,
    pub variables: Variables,
    /// Read through optimistic layers.
    pub optimistic: bool,
    pub return_partial_data: bool,
}

impl DiffOptions {
    pub fn new(document: &Document, variables: &Variables) -> Self {
        Self {
            document: document.clone(),
            variables: variables.clone(),
            optimistic: false,
            return_partial_data: true,
        }
    }

    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }
}

/// Outcome of a cache read: whatever data exists, and whether it was all there.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheDiff {
    pub result: Option<Value>,
    pub complete: bool,
}

impl CacheDiff {
    pub fn complete(result: Value) -> Self {
        Self {
            result: Some(result),
            complete: true,
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }
}

/// A result to store under `data_id` for `(document, variables)`.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub result: Value,
    pub data_id: String,
    pub document: Document,
    pub variables: Variables,
}

pub type WatchCallback = Arc<dyn Fn(CacheDiff) + Send + Sync>;

/// Registration for [`Cache::watch`]. The callback receives every new diff.
#[derive(Clone)]
pub struct CacheWatch {
    pub document: Document,
    pub variables: Variables,
    pub optimistic: bool,
    pub callback: WatchCallback,
}

impl fmt::Debug for CacheWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWatch")
            .field("document", &self.document)
            .field("optimistic", &self.optimistic)
            .finish()
    }
}

/// Releases a cache watch. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct WatchCancel(Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>);

impl WatchCancel {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(cancel)))))
    }

    pub fn cancel(&self) {
        let cancel = self.0.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl fmt::Debug for WatchCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCancel")
            .field("active", &self.0.lock().is_some())
            .finish()
    }
}

/// Storage engine the core reads from and writes to.
///
/// Implementations must not call back into the core while holding their own
/// locks; watch callbacks may re-enter [`Cache::diff`].
#[async_trait]
pub trait Cache: Send + Sync {
    fn diff(&self, options: &DiffOptions) -> CacheDiff;

    fn write(&self, write: CacheWrite);

    fn watch(&self, watch: CacheWatch) -> WatchCancel;

    /// Run `transaction` with watch notification deferred until it returns.
    fn perform_transaction(&self, transaction: &mut dyn FnMut(&dyn Cache));

    /// Run `transaction` against a new optimistic layer tagged `id`.
    fn record_optimistic_transaction(&self, transaction: &mut dyn FnMut(&dyn Cache), id: &str);

    /// Drop the optimistic layer tagged `id`, restoring what it shadowed.
    fn remove_optimistic(&self, id: &str);

    /// Drop all data, optimistic layers included.
    async fn reset(&self);

    fn transform_document(&self, document: &Document) -> Document {
        document.clone()
    }

    fn transform_for_link(&self, document: &Document) -> Document {
        document.clone()
    }
}
