//! Stack values
//!
//! Scalars are stored inline; collectable values are [`GcPtr`]s into the
//! state's heap.

use crate::gc::GcPtr;
use crate::object::{Buffer, Function, Table, Userdata, VmString};
use vmprobe_bridge::{DescriptorId, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Vector([f32; 3]),
    LightUserdata(usize),
    String(GcPtr<VmString>),
    Table(GcPtr<Table>),
    Function(GcPtr<Function>),
    Userdata(GcPtr<Userdata>),
    Buffer(GcPtr<Buffer>),
}

impl Value {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Number(_) => ValueKind::Number,
            Value::Vector(_) => ValueKind::Vector,
            Value::LightUserdata(_) => ValueKind::LightUserdata,
            Value::String(_) => ValueKind::String,
            Value::Table(_) => ValueKind::Table,
            Value::Function(_) => ValueKind::Function,
            Value::Userdata(_) => ValueKind::Userdata,
            Value::Buffer(_) => ValueKind::Buffer,
        }
    }

    /// Identity of the value, as returned by `to_pointer`
    ///
    /// Collectable values are identified by their heap address, light
    /// userdata by the address it carries. Scalars have no identity.
    pub(crate) fn identity(&self) -> Option<DescriptorId> {
        match self {
            Value::LightUserdata(addr) => DescriptorId::from_addr(*addr),
            Value::String(ptr) => Some(ptr.identity()),
            Value::Table(ptr) => Some(ptr.identity()),
            Value::Function(ptr) => Some(ptr.identity()),
            Value::Userdata(ptr) => Some(ptr.identity()),
            Value::Buffer(ptr) => Some(ptr.identity()),
            Value::Nil | Value::Boolean(_) | Value::Number(_) | Value::Vector(_) => None,
        }
    }

    /// Metatable attached to a table or userdata
    pub(crate) fn metatable(&self) -> Option<GcPtr<Table>> {
        match self {
            Value::Table(table) => table.get().metatable,
            Value::Userdata(userdata) => userdata.get().metatable,
            _ => None,
        }
    }
}
