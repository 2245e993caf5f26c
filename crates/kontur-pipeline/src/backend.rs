//! Native buffer backend.
//!
//! [`NativeHeap`] stores image buffers outside of normal Rust ownership:
//! allocating returns an opaque [`BufferHandle`], and the buffer stays
//! alive until that handle is released exactly once. This mirrors how a
//! native image-processing library hands out matrices that the caller
//! must free by hand, and gives the [`ResourceTracker`] and the detector
//! something real to account for.
//!
//! The heap also models backend readiness. A heap created with
//! [`NativeHeap::deferred`] refuses work until its [`HeapLoader`] is
//! finished, and no heap reports ready until a [`Backend::probe`] has
//! succeeded.
//!
//! [`ResourceTracker`]: crate::resource::ResourceTracker

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::contours::Contour as RawContour;

use crate::morphology::StructuringElement;
use crate::resource::{NativeHandle, ResourceError};
use crate::types::Point;

/// Signed 16-bit single-channel image, the output type of derivative
/// filters.
pub type DerivativeImage = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Data held by a native buffer.
#[derive(Debug, Clone)]
pub enum Buffer {
    /// Four-channel source surface.
    Rgba(RgbaImage),
    /// Single-channel 8-bit intensity or edge map.
    Gray(GrayImage),
    /// Signed derivative response.
    Derivative(DerivativeImage),
    /// Structuring element for morphology.
    Kernel(StructuringElement),
    /// Raw output of contour extraction.
    Contours(Vec<RawContour<u32>>),
    /// A single contour outline.
    Shape(Vec<Point>),
}

impl Buffer {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Rgba(_) => "rgba",
            Self::Gray(_) => "gray",
            Self::Derivative(_) => "derivative",
            Self::Kernel(_) => "kernel",
            Self::Contours(_) => "contours",
            Self::Shape(_) => "shape",
        }
    }
}

/// Readiness probe for an image-processing backend.
pub trait Backend {
    /// Try to construct and immediately release a trivial native object.
    ///
    /// Returns `true` on success and records the backend as ready.
    fn probe(&self) -> bool;

    /// Whether a probe has ever succeeded.
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Default)]
struct Slots {
    buffers: HashMap<u64, Buffer>,
}

#[derive(Debug)]
struct HeapState {
    slots: Mutex<Slots>,
    next_id: AtomicU64,
    available: AtomicBool,
    ready: AtomicBool,
}

impl HeapState {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared store of manually-released image buffers.
///
/// Cloning a `NativeHeap` yields another reference to the same store.
#[derive(Debug, Clone)]
pub struct NativeHeap {
    state: Arc<HeapState>,
}

/// Completes initialization of a heap created by
/// [`NativeHeap::deferred`].
#[derive(Debug)]
pub struct HeapLoader {
    state: Weak<HeapState>,
}

impl HeapLoader {
    /// Mark the backend as loaded. Subsequent probes succeed.
    pub fn finish(self) {
        if let Some(state) = self.state.upgrade() {
            state.available.store(true, Ordering::SeqCst);
            tracing::debug!("native heap finished loading");
        }
    }
}

impl Default for NativeHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeHeap {
    /// Create a heap that is available immediately.
    ///
    /// It still needs one successful [`probe`](Backend::probe) before
    /// the detector will use it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_availability(true)
    }

    /// Create a heap whose backend is still loading.
    ///
    /// Probes fail until [`HeapLoader::finish`] is called.
    #[must_use]
    pub fn deferred() -> (Self, HeapLoader) {
        let heap = Self::with_availability(false);
        let loader = HeapLoader {
            state: Arc::downgrade(&heap.state),
        };
        (heap, loader)
    }

    fn with_availability(available: bool) -> Self {
        Self {
            state: Arc::new(HeapState {
                slots: Mutex::new(Slots::default()),
                next_id: AtomicU64::new(1),
                available: AtomicBool::new(available),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Store `buffer` and return the handle that owns it.
    #[must_use = "dropping the handle without releasing it leaks the buffer"]
    pub fn alloc(&self, buffer: Buffer) -> BufferHandle {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().buffers.insert(id, buffer);
        BufferHandle {
            id,
            heap: Arc::downgrade(&self.state),
        }
    }

    /// Number of buffers currently alive.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Run `f` against the intensity image behind `handle`.
    ///
    /// The heap is locked while `f` runs; `f` must not touch the heap.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Gray`].
    pub fn with_gray<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&GrayImage) -> R,
    ) -> Result<R, ResourceError> {
        self.with_buffer(handle, "gray", |buffer| match buffer {
            Buffer::Gray(img) => Some(f(img)),
            _ => None,
        })
    }

    /// Run `f` against the RGBA surface behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Rgba`].
    pub fn with_rgba<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&RgbaImage) -> R,
    ) -> Result<R, ResourceError> {
        self.with_buffer(handle, "rgba", |buffer| match buffer {
            Buffer::Rgba(img) => Some(f(img)),
            _ => None,
        })
    }

    /// Run `f` against the derivative image behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Derivative`].
    pub fn with_derivative<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&DerivativeImage) -> R,
    ) -> Result<R, ResourceError> {
        self.with_buffer(handle, "derivative", |buffer| match buffer {
            Buffer::Derivative(img) => Some(f(img)),
            _ => None,
        })
    }

    /// Run `f` against two derivative images at once.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if either handle is stale or either
    /// buffer is not a [`Buffer::Derivative`].
    pub fn with_derivatives<R>(
        &self,
        first: &BufferHandle,
        second: &BufferHandle,
        f: impl FnOnce(&DerivativeImage, &DerivativeImage) -> R,
    ) -> Result<R, ResourceError> {
        for handle in [first, second] {
            if !handle.belongs_to(&self.state) {
                return Err(ResourceError::BackendGone { id: handle.id });
            }
        }
        let slots = self.state.lock();
        let lookup = |handle: &BufferHandle| match slots.buffers.get(&handle.id) {
            Some(Buffer::Derivative(img)) => Ok(img),
            Some(_) => Err(ResourceError::KindMismatch {
                id: handle.id,
                expected: "derivative",
            }),
            None => Err(ResourceError::Released { id: handle.id }),
        };
        Ok(f(lookup(first)?, lookup(second)?))
    }

    /// Read the structuring element behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Kernel`].
    pub fn kernel(&self, handle: &BufferHandle) -> Result<StructuringElement, ResourceError> {
        self.with_buffer(handle, "kernel", |buffer| match buffer {
            Buffer::Kernel(k) => Some(*k),
            _ => None,
        })
    }

    /// Run `f` against the raw contour list behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Contours`].
    pub fn with_contours<R>(
        &self,
        handle: &BufferHandle,
        f: impl FnOnce(&[RawContour<u32>]) -> R,
    ) -> Result<R, ResourceError> {
        self.with_buffer(handle, "contours", |buffer| match buffer {
            Buffer::Contours(c) => Some(f(c)),
            _ => None,
        })
    }

    /// Copy out the outline behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the handle is stale or the buffer is
    /// not a [`Buffer::Shape`].
    pub fn shape(&self, handle: &BufferHandle) -> Result<Vec<Point>, ResourceError> {
        self.with_buffer(handle, "shape", |buffer| match buffer {
            Buffer::Shape(points) => Some(points.clone()),
            _ => None,
        })
    }

    fn with_buffer<R>(
        &self,
        handle: &BufferHandle,
        expected: &'static str,
        f: impl FnOnce(&Buffer) -> Option<R>,
    ) -> Result<R, ResourceError> {
        if !handle.belongs_to(&self.state) {
            return Err(ResourceError::BackendGone { id: handle.id });
        }
        let slots = self.state.lock();
        let buffer = slots
            .buffers
            .get(&handle.id)
            .ok_or(ResourceError::Released { id: handle.id })?;
        let found = buffer.kind();
        f(buffer).ok_or_else(|| {
            tracing::debug!(id = handle.id, found, expected, "buffer kind mismatch");
            ResourceError::KindMismatch {
                id: handle.id,
                expected,
            }
        })
    }
}

impl Backend for NativeHeap {
    fn probe(&self) -> bool {
        if !self.state.available.load(Ordering::SeqCst) {
            return false;
        }
        let trivial = self.alloc(Buffer::Gray(GrayImage::new(1, 1)));
        if trivial.release().is_err() {
            return false;
        }
        self.state.ready.store(true, Ordering::SeqCst);
        true
    }

    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }
}

/// Opaque reference to a buffer living in a [`NativeHeap`].
///
/// Handles are cheap to clone; every clone refers to the same buffer,
/// so releasing through one invalidates all of them. A handle does not
/// keep its heap alive.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    id: u64,
    heap: Weak<HeapState>,
}

impl BufferHandle {
    /// The heap-unique identifier of this buffer.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    fn belongs_to(&self, state: &Arc<HeapState>) -> bool {
        std::ptr::eq(self.heap.as_ptr(), Arc::as_ptr(state))
    }
}

impl PartialEq for BufferHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.heap, &other.heap)
    }
}

impl Eq for BufferHandle {}

impl NativeHandle for BufferHandle {
    fn is_valid(&self) -> bool {
        self.heap
            .upgrade()
            .is_some_and(|state| state.lock().buffers.contains_key(&self.id))
    }

    fn release(&self) -> Result<(), ResourceError> {
        let state = self
            .heap
            .upgrade()
            .ok_or(ResourceError::BackendGone { id: self.id })?;
        let removed = state.lock().buffers.remove(&self.id);
        removed
            .map(|_| ())
            .ok_or(ResourceError::Released { id: self.id })
    }
}
