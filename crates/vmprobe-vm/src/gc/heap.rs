//! Heap allocator for VM objects
//!
//! Every allocation is charged to a memory category. The heap keeps running
//! totals per category so accounting queries do not need a walk; the walk
//! ([`Heap::iter_allocations`]) is there for dumps.

use super::header::{DropFn, GcHeader};
use super::ptr::GcPtr;
use crate::object::HeapObject;
use crate::{VmError, VmResult};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use vmprobe_bridge::MemoryCategory;

/// Heap allocator for VM-managed memory
pub(crate) struct Heap {
    /// All allocations (pointer to GcHeader)
    allocations: Vec<*mut GcHeader>,

    /// Total bytes charged across categories
    allocated_bytes: usize,

    /// Bytes charged per category
    category_bytes: Box<[usize]>,

    /// Maximum heap size (0 = unlimited)
    max_heap_bytes: usize,
}

/// Generic drop shim for calling drop glue through a function pointer
unsafe fn drop_in_place_shim<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

impl Heap {
    pub(crate) fn new(max_heap_bytes: usize) -> Self {
        Self {
            allocations: Vec::new(),
            allocated_bytes: 0,
            category_bytes: vec![0; MemoryCategory::COUNT].into_boxed_slice(),
            max_heap_bytes,
        }
    }

    /// Allocate an object charged to `category`
    ///
    /// The object's out-of-line payload (string bytes, userdata block) is
    /// charged along with the block itself.
    pub(crate) fn allocate<T: HeapObject>(
        &mut self,
        value: T,
        category: MemoryCategory,
    ) -> VmResult<GcPtr<T>> {
        debug_assert!(std::mem::align_of::<T>() <= std::mem::align_of::<GcHeader>());
        debug_assert!(T::KIND.is_collectable());

        let header_layout = Layout::new::<GcHeader>();
        let (combined_layout, value_offset) = header_layout
            .extend(Layout::new::<T>())
            .map_err(|_| self.limit_error(usize::MAX))?;
        let combined_layout = combined_layout.pad_to_align();

        let payload = value.payload_bytes();
        let footprint = combined_layout
            .size()
            .checked_add(payload)
            .ok_or_else(|| self.limit_error(usize::MAX))?;
        self.check_room(footprint)?;

        let drop_fn = if std::mem::needs_drop::<T>() {
            Some(drop_in_place_shim::<T> as DropFn)
        } else {
            None
        };

        let ptr = unsafe { alloc(combined_layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(combined_layout);
        }

        let header_ptr = ptr as *mut GcHeader;
        unsafe {
            header_ptr.write(GcHeader::new(
                T::KIND,
                category,
                value_offset as u8,
                combined_layout.size(),
                combined_layout.align(),
                payload,
                drop_fn,
            ));
        }

        let value_ptr = unsafe { ptr.add(value_offset) as *mut T };
        unsafe {
            value_ptr.write(value);
        }

        self.allocations.push(header_ptr);
        self.allocated_bytes += footprint;
        self.category_bytes[category.index()] += footprint;

        Ok(unsafe { GcPtr::new(NonNull::new_unchecked(value_ptr)) })
    }

    /// Fail unless `bytes` more fit under the heap limit
    ///
    /// Payload sizes are checked with this before the object is built.
    pub(crate) fn check_room(&self, bytes: usize) -> VmResult<()> {
        let total = self
            .allocated_bytes
            .checked_add(bytes)
            .ok_or_else(|| self.limit_error(bytes))?;
        if self.max_heap_bytes > 0 && total > self.max_heap_bytes {
            return Err(self.limit_error(bytes));
        }
        Ok(())
    }

    pub(crate) fn limit_error(&self, requested: usize) -> VmError {
        VmError::HeapLimit {
            requested,
            limit: self.max_heap_bytes,
        }
    }

    /// Total bytes charged across categories
    pub(crate) fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Bytes charged to one category
    pub(crate) fn category_bytes(&self, category: MemoryCategory) -> usize {
        self.category_bytes[category.index()]
    }

    /// Categories with a non-zero charge, in id order
    pub(crate) fn categories_in_use(&self) -> impl Iterator<Item = (MemoryCategory, usize)> + '_ {
        self.category_bytes
            .iter()
            .enumerate()
            .filter(|(_, &bytes)| bytes > 0)
            .map(|(id, &bytes)| (MemoryCategory(id as u8), bytes))
    }

    pub(crate) fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Iterate over all allocations, oldest first
    pub(crate) fn iter_allocations(&self) -> impl Iterator<Item = &GcHeader> + '_ {
        // SAFETY: headers stay valid until the heap is dropped
        self.allocations.iter().map(|&header_ptr| unsafe { &*header_ptr })
    }

    /// Iterate over `(header, object pointer)` pairs, oldest first
    pub(crate) fn iter_objects(&self) -> impl Iterator<Item = (&GcHeader, *mut u8)> + '_ {
        self.allocations.iter().map(|&header_ptr| unsafe {
            (&*header_ptr, GcHeader::object_ptr(header_ptr))
        })
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for &header_ptr in &self.allocations {
            unsafe {
                let header = *header_ptr;
                header.run_drop(header_ptr);

                let layout = Layout::from_size_align_unchecked(header.size(), header.align());
                dealloc(header_ptr as *mut u8, layout);
            }
        }
        self.allocations.clear();
    }
}
