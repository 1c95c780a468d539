//! Heap dump
//!
//! The dump is a single JSON document, written as the heap is walked:
//!
//! ```text
//! {
//!   "objects": { "0x55d0c8a0": {"type":"table","cat":0,"size":96,"metatable":"0x55d0c940"}, ... },
//!   "roots": {"registry":"0x...","globals":"0x..."},
//!   "stats": {"size":1234,"categories":{"0":{"name":"main","size":1000},"3":{"size":234}}}
//! }
//! ```
//!
//! `objects` stays empty while `DebugDumpObjects` is off. Categories appear
//! in id order and only when they have bytes charged; `name` is present when
//! a label resolver was supplied.

use crate::flags::DEBUG_DUMP_OBJECTS;
use crate::gc::GcHeader;
use crate::object::{Function, Table, Userdata, VmString};
use crate::VmState;
use serde::Serialize;
use std::io::{self, Write};
use vmprobe_bridge::{DescriptorId, MemoryCategory, ValueKind};

#[derive(Serialize)]
struct ObjectRecord<'a> {
    #[serde(rename = "type")]
    kind: ValueKind,
    cat: MemoryCategory,
    size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    metatable: Option<DescriptorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a str>,
}

#[derive(Serialize)]
struct Roots {
    registry: DescriptorId,
    globals: DescriptorId,
}

#[derive(Serialize)]
struct CategoryRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    size: usize,
}

pub(crate) fn write_dump(
    state: &VmState,
    sink: &mut dyn Write,
    labels: Option<&dyn Fn(&VmState, MemoryCategory) -> String>,
) -> io::Result<()> {
    sink.write_all(b"{\"objects\":{")?;
    if DEBUG_DUMP_OBJECTS.get() {
        write_objects(state, sink)?;
    }

    sink.write_all(b"},\"roots\":")?;
    serde_json::to_writer(
        &mut *sink,
        &Roots {
            registry: state.registry_id(),
            globals: state.globals_id(),
        },
    )?;

    write!(sink, ",\"stats\":{{\"size\":{},\"categories\":{{", state.total_bytes())?;
    let mut categories = 0usize;
    for (category, bytes) in state.heap().categories_in_use() {
        let name = labels.map(|label| label(state, category));
        if categories > 0 {
            sink.write_all(b",")?;
        }
        write!(sink, "\"{}\":", category)?;
        serde_json::to_writer(&mut *sink, &CategoryRecord { name, size: bytes })?;
        categories += 1;
    }
    sink.write_all(b"}}}\n")?;

    tracing::debug!(categories, bytes = state.total_bytes(), "heap dump written");
    sink.flush()
}

fn write_objects(state: &VmState, sink: &mut dyn Write) -> io::Result<()> {
    let mut first = true;
    for (header, object) in state.heap().iter_objects() {
        let Some(id) = DescriptorId::from_ptr(object) else {
            continue;
        };
        if !first {
            sink.write_all(b",")?;
        }
        first = false;

        serde_json::to_writer(&mut *sink, &id)?;
        sink.write_all(b":")?;
        // SAFETY: `object` comes from the heap walk and `header` describes it
        let record = unsafe { object_record(header, object) };
        serde_json::to_writer(&mut *sink, &record)?;
    }
    Ok(())
}

/// # Safety
///
/// `object` must be the live object described by `header`.
unsafe fn object_record(header: &GcHeader, object: *mut u8) -> ObjectRecord<'_> {
    let mut record = ObjectRecord {
        kind: header.kind(),
        cat: header.category(),
        size: header.footprint(),
        metatable: None,
        tag: None,
        name: None,
        data: None,
    };

    // The header kind is set from the stored type at allocation
    match header.kind() {
        ValueKind::Table => {
            let table = &*(object as *const Table);
            record.metatable = table.metatable.map(|metatable| metatable.identity());
        }
        ValueKind::Userdata => {
            let userdata = &*(object as *const Userdata);
            record.metatable = userdata.metatable.map(|metatable| metatable.identity());
            record.tag = Some(userdata.tag);
        }
        ValueKind::Function => {
            let function = &*(object as *const Function);
            record.name = Some(&*function.name);
        }
        ValueKind::String => {
            let string = &*(object as *const VmString);
            record.data = Some(&*string.data);
        }
        _ => {}
    }
    record
}
