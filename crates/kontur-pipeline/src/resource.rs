//! Bounded tracking of manually-released native buffers.
//!
//! A [`ResourceTracker`] remembers handles in insertion order and keeps
//! at most [`ResourceTracker::DEFAULT_CAPACITY`] of them alive. Tracking
//! one handle past capacity evicts (and releases) the oldest one. This is
//! insertion-order eviction, not LRU: handles carry no access timestamp.
//!
//! The detector does not rely on eviction for cleanup. Each invocation
//! owns its transient buffers through a scope guard and releases them on
//! every exit path, so the capacity bound is a backstop that only fires
//! when a caller tracks handles it never releases.
//!
//! All release paths are "safe": a handle that fails its validity probe
//! (already released, or its backend is gone) is skipped and logged,
//! never released twice.

use std::collections::VecDeque;

/// Errors raised by native handle operations.
///
/// These never escape the tracker itself: tracking and release failures
/// are logged and swallowed so they cannot block cleanup of other
/// handles. The detector does surface them when a buffer it is actively
/// reading turns out to be invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The handle no longer refers to a live buffer.
    #[error("buffer {id} was already released")]
    Released {
        /// Identifier of the released buffer.
        id: u64,
    },

    /// The backend that issued the handle has been dropped.
    #[error("backend for buffer {id} no longer exists")]
    BackendGone {
        /// Identifier of the orphaned buffer.
        id: u64,
    },

    /// The buffer exists but holds a different kind of data.
    #[error("buffer {id} does not hold {expected}")]
    KindMismatch {
        /// Identifier of the buffer.
        id: u64,
        /// The buffer kind the caller asked for.
        expected: &'static str,
    },
}

/// A reference to a native buffer that must be released exactly once.
///
/// `is_valid` is the validity probe: it returns `false` for handles that
/// were already released or whose backend is gone. `release` frees the
/// buffer and reports an error instead of faulting when the handle is
/// stale.
pub trait NativeHandle: PartialEq {
    /// Whether the handle still refers to a live buffer.
    fn is_valid(&self) -> bool;

    /// Free the underlying buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the buffer was already released or
    /// its backend no longer exists.
    fn release(&self) -> Result<(), ResourceError>;
}

/// Release `handle` only if it passes the validity probe.
///
/// Calling this twice on the same handle is a no-op the second time.
/// Returns `true` if the buffer was actually freed by this call.
pub fn safe_release<H: NativeHandle>(handle: &H) -> bool {
    if !handle.is_valid() {
        tracing::debug!("skipping release of invalid handle");
        return false;
    }
    match handle.release() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "failed to release native buffer");
            false
        }
    }
}

/// Insertion-ordered registry of live native handles with a capacity
/// bound.
#[derive(Debug)]
pub struct ResourceTracker<H> {
    handles: VecDeque<H>,
    capacity: usize,
    peak: usize,
}

impl<H: NativeHandle> Default for ResourceTracker<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: NativeHandle> ResourceTracker<H> {
    /// Number of handles tracked before the oldest is evicted.
    pub const DEFAULT_CAPACITY: usize = 15;

    /// Create a tracker with [`DEFAULT_CAPACITY`](Self::DEFAULT_CAPACITY).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a tracker that evicts once more than `capacity` handles are
    /// tracked. A capacity of zero is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            handles: VecDeque::with_capacity(capacity + 1),
            capacity,
            peak: 0,
        }
    }

    /// Register a handle.
    ///
    /// Handles that fail the validity probe are ignored (logged), as are
    /// handles already being tracked. If the registry grows past capacity
    /// the oldest handle is released and dropped from tracking.
    ///
    /// Returns `true` if the handle is now tracked.
    pub fn track(&mut self, handle: H) -> bool {
        if !handle.is_valid() {
            tracing::warn!("refusing to track an invalid native handle");
            return false;
        }
        if self.handles.contains(&handle) {
            return true;
        }
        self.handles.push_back(handle);
        while self.handles.len() > self.capacity {
            self.evict_oldest();
        }
        self.peak = self.peak.max(self.handles.len());
        true
    }

    /// Stop tracking `handle` without releasing it.
    ///
    /// Used when ownership of a buffer moves out of the tracker (e.g. to
    /// the retained snapshot or to the caller). Returns `true` if the
    /// handle was tracked.
    pub fn untrack(&mut self, handle: &H) -> bool {
        self.handles
            .iter()
            .position(|h| h == handle)
            .and_then(|idx| self.handles.remove(idx))
            .is_some()
    }

    /// Safely release `handle` and stop tracking it.
    ///
    /// Returns `true` if the buffer was freed by this call.
    pub fn release(&mut self, handle: &H) -> bool {
        self.untrack(handle);
        safe_release(handle)
    }

    /// Release and forget every tracked handle.
    pub fn cleanup_all(&mut self) {
        let released = self
            .handles
            .drain(..)
            .filter(|handle| safe_release(handle))
            .count();
        tracing::debug!(released, "released all tracked native buffers");
    }

    /// Number of handles currently tracked.
    #[must_use]
    pub fn usage_count(&self) -> usize {
        self.handles.len()
    }

    /// Largest number of handles tracked at once since creation.
    #[must_use]
    pub const fn peak_usage(&self) -> usize {
        self.peak
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `handle` is currently tracked.
    #[must_use]
    pub fn is_tracked(&self, handle: &H) -> bool {
        self.handles.contains(handle)
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.handles.pop_front() {
            tracing::debug!(capacity = self.capacity, "evicting oldest native buffer");
            safe_release(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Handle double that counts how often it was freed.
    #[derive(Debug, Clone)]
    struct FakeHandle {
        id: u32,
        live: Arc<AtomicBool>,
        releases: Arc<AtomicUsize>,
    }

    impl FakeHandle {
        fn new(id: u32) -> Self {
            Self {
                id,
                live: Arc::new(AtomicBool::new(true)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn release_count(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl PartialEq for FakeHandle {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl NativeHandle for FakeHandle {
        fn is_valid(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }

        fn release(&self) -> Result<(), ResourceError> {
            if !self.live.swap(false, Ordering::SeqCst) {
                return Err(ResourceError::Released {
                    id: u64::from(self.id),
                });
            }
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn sixteenth_track_evicts_first() {
        let mut tracker = ResourceTracker::new();
        let handles: Vec<FakeHandle> = (1..=16).map(FakeHandle::new).collect();
        for h in &handles {
            tracker.track(h.clone());
        }

        assert_eq!(tracker.usage_count(), 15);
        assert!(!tracker.is_tracked(&handles[0]));
        assert_eq!(handles[0].release_count(), 1);
        for h in &handles[1..] {
            assert!(tracker.is_tracked(h));
            assert_eq!(h.release_count(), 0);
        }
    }

    #[test]
    fn usage_never_exceeds_capacity() {
        let mut tracker = ResourceTracker::with_capacity(4);
        for id in 0..50 {
            tracker.track(FakeHandle::new(id));
            assert!(tracker.usage_count() <= 4);
        }
        assert_eq!(tracker.peak_usage(), 4);
    }

    #[test]
    fn invalid_handle_is_ignored() {
        let mut tracker = ResourceTracker::new();
        let h = FakeHandle::new(1);
        h.live.store(false, Ordering::SeqCst);
        assert!(!tracker.track(h));
        assert_eq!(tracker.usage_count(), 0);
    }

    #[test]
    fn tracking_twice_does_not_duplicate() {
        let mut tracker = ResourceTracker::new();
        let h = FakeHandle::new(7);
        tracker.track(h.clone());
        tracker.track(h);
        assert_eq!(tracker.usage_count(), 1);
    }

    #[test]
    fn safe_release_twice_frees_once() {
        let h = FakeHandle::new(3);
        assert!(safe_release(&h));
        assert!(!safe_release(&h));
        assert_eq!(h.release_count(), 1);
    }

    #[test]
    fn release_untracks_and_frees() {
        let mut tracker = ResourceTracker::new();
        let h = FakeHandle::new(9);
        tracker.track(h.clone());
        assert!(tracker.release(&h));
        assert!(!tracker.is_tracked(&h));
        assert!(!tracker.release(&h));
        assert_eq!(h.release_count(), 1);
    }

    #[test]
    fn untrack_keeps_buffer_alive() {
        let mut tracker = ResourceTracker::new();
        let h = FakeHandle::new(2);
        tracker.track(h.clone());
        assert!(tracker.untrack(&h));
        assert!(h.is_valid());
        assert_eq!(tracker.usage_count(), 0);
    }

    #[test]
    fn cleanup_all_releases_everything() {
        let mut tracker = ResourceTracker::new();
        let handles: Vec<FakeHandle> = (0..5).map(FakeHandle::new).collect();
        for h in &handles {
            tracker.track(h.clone());
        }
        // One handle was already freed elsewhere; cleanup must skip it.
        safe_release(&handles[2]);

        tracker.cleanup_all();

        assert_eq!(tracker.usage_count(), 0);
        for h in &handles {
            assert_eq!(h.release_count(), 1);
        }
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let tracker: ResourceTracker<FakeHandle> = ResourceTracker::with_capacity(0);
        assert_eq!(tracker.capacity(), 1);
    }
}
