//! Heap object pointers

use super::header::GcHeader;
use std::fmt;
use std::ptr::NonNull;
use vmprobe_bridge::DescriptorId;

/// Pointer to an object owned by a [`Heap`](super::Heap)
///
/// Copyable and compared by address. Objects are only freed when their heap
/// is dropped, and every pointer lives inside the `VmState` that owns that
/// heap, so a `GcPtr` reachable from the state is always valid.
pub(crate) struct GcPtr<T> {
    ptr: NonNull<T>,
}

impl<T> GcPtr<T> {
    /// # Safety
    ///
    /// `ptr` must point to an object allocated by a heap, with its
    /// `GcHeader` immediately before it.
    #[inline]
    pub(crate) unsafe fn new(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }

    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Identity token for this object
    #[inline]
    pub(crate) fn identity(&self) -> DescriptorId {
        // NonNull is never zero
        match DescriptorId::from_addr(self.addr()) {
            Some(id) => id,
            None => unreachable!("GcPtr is non-null"),
        }
    }

    /// Shared access to the object
    #[inline]
    pub(crate) fn get(&self) -> &T {
        // SAFETY: see type-level docs; the owning heap outlives every GcPtr.
        unsafe { self.ptr.as_ref() }
    }

    /// Exclusive access to the object
    ///
    /// # Safety
    ///
    /// No other reference to the object may be alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut T {
        &mut *self.ptr.as_ptr()
    }

    /// Header preceding the object
    #[inline]
    pub(crate) fn header(&self) -> &GcHeader {
        // SAFETY: the heap writes the header at a fixed offset before every
        // object with alignment <= 8.
        unsafe {
            let header_ptr = (self.ptr.as_ptr() as *const u8).sub(std::mem::size_of::<GcHeader>());
            &*(header_ptr as *const GcHeader)
        }
    }
}

impl<T> Clone for GcPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GcPtr<T> {}

impl<T> PartialEq for GcPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for GcPtr<T> {}

impl<T> fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GcPtr({:#x})", self.addr())
    }
}
