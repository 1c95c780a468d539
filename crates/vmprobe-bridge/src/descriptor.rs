//! Descriptor identity
//!
//! Tables and userdata can carry a type descriptor (a metatable). The bridge
//! hands descriptors out as [`DescriptorId`]s: opaque identity tokens that
//! compare, hash and print, but cannot be turned back into a reference. The
//! VM stays free to move or collect the object; a stale token merely stops
//! matching anything.

use crate::{StackIndex, ValueKind, VmIntrospect};
use serde::{Serialize, Serializer};
use std::fmt;
use std::num::NonZeroUsize;

/// Identity of a VM object, for comparison and logging only
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DescriptorId(NonZeroUsize);

impl DescriptorId {
    /// Identity of the object at `ptr`; `None` for a null pointer
    #[inline]
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Option<Self> {
        Self::from_addr(ptr.cast::<u8>() as usize)
    }

    /// Identity from a raw address; `None` for zero
    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    /// Address the identity was taken from
    #[inline]
    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// The address as an untyped pointer, for C callers comparing identities
    ///
    /// The pointer must not be dereferenced.
    #[inline]
    pub fn to_raw(self) -> *const () {
        self.addr() as *const ()
    }
}

impl fmt::Debug for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorId({:#x})", self.addr())
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

impl Serialize for DescriptorId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Descriptor attached to the value at `index`
///
/// Returns the identity of the descriptor for a table or userdata that has
/// one. Returns `None` when the index does not resolve, when the value has no
/// descriptor, and for every other kind of value: the two cases are not
/// distinguished.
///
/// Pure read: nothing is allocated and no collection is triggered. The
/// returned token is only meaningful while the value is alive.
pub fn associated_descriptor<V>(vm: &V, index: StackIndex) -> Option<DescriptorId>
where
    V: VmIntrospect + ?Sized,
{
    let kind = vm.value_kind(index);
    let descriptor = match kind {
        Some(ValueKind::Table) | Some(ValueKind::Userdata) => vm.attached_descriptor(index),
        _ => None,
    };

    tracing::trace!(index, ?kind, ?descriptor, "descriptor query");
    descriptor
}
