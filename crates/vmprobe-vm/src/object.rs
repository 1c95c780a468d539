//! Heap object types

use crate::gc::GcPtr;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::collections::TryReserveError;
use std::mem::size_of;
use vmprobe_bridge::ValueKind;

/// Object that can be placed on the heap
pub(crate) trait HeapObject: 'static {
    /// Kind recorded in the object's header
    const KIND: ValueKind;

    /// Out-of-line bytes owned by the object, charged at allocation
    fn payload_bytes(&self) -> usize {
        0
    }
}

/// Immutable string
#[derive(Debug)]
pub(crate) struct VmString {
    pub(crate) data: Box<str>,
}

impl HeapObject for VmString {
    const KIND: ValueKind = ValueKind::String;

    fn payload_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Table with an array part, a hash part keyed by strings, and an optional
/// metatable
#[derive(Debug, Default)]
pub(crate) struct Table {
    pub(crate) array: Vec<Value>,
    pub(crate) fields: FxHashMap<Box<str>, Value>,
    pub(crate) metatable: Option<GcPtr<Table>>,
}

impl Table {
    /// Bytes a table with these part sizes asks for up front
    pub(crate) fn requested_bytes(narray: usize, nrecords: usize) -> Option<usize> {
        let array = narray.checked_mul(size_of::<Value>())?;
        let records = nrecords.checked_mul(size_of::<Box<str>>() + size_of::<Value>())?;
        array.checked_add(records)
    }

    pub(crate) fn try_with_capacity(
        narray: usize,
        nrecords: usize,
    ) -> Result<Self, TryReserveError> {
        let mut array = Vec::new();
        array.try_reserve_exact(narray)?;
        let mut fields = FxHashMap::default();
        fields.try_reserve(nrecords)?;
        Ok(Self {
            array,
            fields,
            metatable: None,
        })
    }
}

impl HeapObject for Table {
    const KIND: ValueKind = ValueKind::Table;

    fn payload_bytes(&self) -> usize {
        self.array.capacity() * size_of::<Value>()
            + self.fields.capacity() * (size_of::<Box<str>>() + size_of::<Value>())
    }
}

/// Zero-filled block of `size` bytes that reports failure instead of aborting
pub(crate) fn zeroed_block(size: usize) -> Result<Box<[u8]>, TryReserveError> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)?;
    data.resize(size, 0);
    Ok(data.into_boxed_slice())
}

/// Host-defined block of bytes
#[derive(Debug)]
pub(crate) struct Userdata {
    pub(crate) tag: u8,
    pub(crate) data: Box<[u8]>,
    pub(crate) metatable: Option<GcPtr<Table>>,
}

impl HeapObject for Userdata {
    const KIND: ValueKind = ValueKind::Userdata;

    fn payload_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Function placeholder; carries only a debug name
#[derive(Debug)]
pub(crate) struct Function {
    pub(crate) name: Box<str>,
}

impl HeapObject for Function {
    const KIND: ValueKind = ValueKind::Function;

    fn payload_bytes(&self) -> usize {
        self.name.len()
    }
}

/// Fixed-size mutable byte buffer
#[derive(Debug)]
pub(crate) struct Buffer {
    pub(crate) data: Box<[u8]>,
}

impl HeapObject for Buffer {
    const KIND: ValueKind = ValueKind::Buffer;

    fn payload_bytes(&self) -> usize {
        self.data.len()
    }
}
