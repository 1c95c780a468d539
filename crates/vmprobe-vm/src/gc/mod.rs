//! Object heap
//!
//! Objects live until the owning [`Heap`] is dropped; there are no collection
//! cycles. Each object carries a [`GcHeader`] with its kind, memory category
//! and size, which is all the introspection layer reads.

mod header;
mod heap;
mod ptr;

pub(crate) use header::GcHeader;
pub(crate) use heap::Heap;
pub(crate) use ptr::GcPtr;
