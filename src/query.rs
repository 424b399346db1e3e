//! Per-request query state: bounding box, zoom, cancellation and traversal
//! statistics, plus the deduplicating result publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashSet;

use crate::types::BBox31;

/// Cooperative cancellation, polled by the traversal engine before each
/// descent and each publish. Injected into the query as a capability instead
/// of being an overridable publisher method, so "never cancels" is just the
/// default policy.
pub trait CancellationPolicy: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Default policy: never cancels.
#[derive(Debug, Default)]
pub struct NeverCancelled;

impl CancellationPolicy for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shareable one-way flag, typically set from a UI thread while a query runs.
#[derive(Debug, Default)]
pub struct CancellationFlag {
    flag: AtomicBool,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl CancellationPolicy for CancellationFlag {
    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Mutable traversal statistics collected while a query runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Concrete objects decoded from intersecting payload blocks.
    pub visited_objects: u64,
    /// Objects that passed the predicate and were kept by the publisher.
    pub accepted_objects: u64,
    /// Index nodes whose file region was read.
    pub read_subtrees: u64,
    /// Index nodes that decoded successfully and contributed content.
    pub accepted_subtrees: u64,
}

/// An immutable request (bounding box, zoom, cancellation policy) plus the
/// mutable statistics the traversal fills in. Created per request, discarded
/// after; never shared across threads.
pub struct SearchQuery {
    pub bbox: BBox31,
    pub zoom: u8,
    cancellation: Arc<dyn CancellationPolicy>,
    pub stats: SearchStats,
}

impl SearchQuery {
    pub fn new(bbox: BBox31, zoom: u8) -> Self {
        Self {
            bbox,
            zoom,
            cancellation: Arc::new(NeverCancelled),
            stats: SearchStats::default(),
        }
    }

    pub fn with_cancellation(mut self, policy: Arc<dyn CancellationPolicy>) -> Self {
        self.cancellation = policy;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Anything the publisher can deduplicate by stable id.
pub trait Publishable {
    /// Stable object id; values `<= 0` are anonymous and never deduplicated.
    fn object_id(&self) -> i64;
}

/// Accumulates decoded objects, deduplicating by positive stable id.
/// Query-scoped; the caller consumes it when the query returns.
#[derive(Debug)]
pub struct ResultPublisher<T> {
    results: Vec<T>,
    ids: FxHashSet<i64>,
}

impl<T: Publishable> ResultPublisher<T> {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            ids: FxHashSet::default(),
        }
    }

    /// Keep `object` unless its positive id was already published. Returns
    /// whether it was kept; rejected objects are dropped here.
    pub fn publish(&mut self, object: T) -> bool {
        let id = object.object_id();
        if id > 0 && !self.ids.insert(id) {
            return false;
        }
        self.results.push(object);
        true
    }

    /// Publish each object, silently dropping duplicates.
    pub fn publish_only_unique(&mut self, objects: Vec<T>) {
        for object in objects {
            let _ = self.publish(object);
        }
    }

    /// Append every object unconditionally, bypassing dedup. For callers that
    /// have already guaranteed uniqueness.
    pub fn publish_all(&mut self, objects: impl IntoIterator<Item = T>) {
        self.results.extend(objects);
    }

    /// Empty results and the id set.
    pub fn clear(&mut self) {
        self.results.clear();
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn into_results(self) -> Vec<T> {
        self.results
    }
}

impl<T: Publishable> Default for ResultPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}
