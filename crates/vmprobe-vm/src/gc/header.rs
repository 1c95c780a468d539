//! Object header
//!
//! Every heap object is preceded by a header carrying what the heap walk and
//! the memory dump need: the object kind, its memory category and its size.

use vmprobe_bridge::{MemoryCategory, ValueKind};

/// Drop glue for the object that follows a header
pub(crate) type DropFn = unsafe fn(*mut u8);

/// Header stored before each allocated object
///
/// ```text
/// ┌─────────────────────────────────────────┐
/// │ GcHeader (8-byte aligned)               │
/// │  - kind, category, value offset         │
/// │  - layout size / align, payload bytes   │
/// │  - drop glue                            │
/// ├─────────────────────────────────────────┤  ← GcPtr points here
/// │ Object data                             │
/// └─────────────────────────────────────────┘
/// ```
#[repr(C, align(8))]
#[derive(Clone, Copy)]
pub(crate) struct GcHeader {
    kind: ValueKind,
    category: MemoryCategory,
    value_offset: u8,
    align: u32,
    size: usize,
    payload: usize,
    drop_fn: Option<DropFn>,
}

impl GcHeader {
    pub(crate) fn new(
        kind: ValueKind,
        category: MemoryCategory,
        value_offset: u8,
        size: usize,
        align: usize,
        payload: usize,
        drop_fn: Option<DropFn>,
    ) -> Self {
        Self {
            kind,
            category,
            value_offset,
            align: align as u32,
            size,
            payload,
            drop_fn,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> ValueKind {
        self.kind
    }

    #[inline]
    pub(crate) fn category(&self) -> MemoryCategory {
        self.category
    }

    /// Size of the block (header + object)
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn align(&self) -> usize {
        self.align as usize
    }

    /// Bytes charged to the category: the block plus out-of-line payload
    #[inline]
    pub(crate) fn footprint(&self) -> usize {
        self.size + self.payload
    }

    /// Pointer to the object following this header
    ///
    /// # Safety
    ///
    /// `header_ptr` must point to a live header written by the heap.
    #[inline]
    pub(crate) unsafe fn object_ptr(header_ptr: *mut GcHeader) -> *mut u8 {
        let offset = (*header_ptr).value_offset as usize;
        (header_ptr as *mut u8).add(offset)
    }

    /// Run the object's drop glue, if any
    ///
    /// # Safety
    ///
    /// `header_ptr` must point to this header, and the object must not be
    /// used or dropped again afterwards.
    pub(crate) unsafe fn run_drop(&self, header_ptr: *mut GcHeader) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(Self::object_ptr(header_ptr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_alignment() {
        assert_eq!(std::mem::align_of::<GcHeader>(), 8);
        assert_eq!(std::mem::size_of::<GcHeader>() % 8, 0);
    }

    #[test]
    fn test_header_footprint() {
        let header = GcHeader::new(ValueKind::Userdata, MemoryCategory(4), 40, 64, 8, 100, None);
        assert_eq!(header.kind(), ValueKind::Userdata);
        assert_eq!(header.category(), MemoryCategory(4));
        assert_eq!(header.size(), 64);
        assert_eq!(header.footprint(), 164);
    }
}
