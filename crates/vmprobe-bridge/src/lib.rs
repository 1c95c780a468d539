//! vmprobe introspection bridge
//!
//! Read-only access to metadata a VM normally keeps private, for debuggers,
//! profilers and test harnesses:
//! - the descriptor attached to a table or userdata ([`associated_descriptor`])
//! - per-category memory accounting ([`dump_memory_categories`],
//!   [`memory_report`])
//!
//! The VM itself is an external collaborator: it implements [`VmIntrospect`]
//! and the bridge builds its queries on top. Every operation is synchronous
//! and runs on the calling thread. A query borrows the VM for its whole
//! duration, so the VM cannot execute script code concurrently.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod descriptor;
pub mod kind;
pub mod memory;

pub use descriptor::{associated_descriptor, DescriptorId};
pub use kind::ValueKind;
pub use memory::{
    category_usage, dump_memory, dump_memory_categories, memory_report, Allocation,
    CategoryUsage, LabeledUsage, MemoryCategory, MemoryReport,
};

use std::io::{self, Write};

/// Stack position, in the VM's own addressing convention
pub type StackIndex = i32;

/// What a VM must expose for the bridge to inspect it
///
/// Index resolution is entirely the VM's business; an index that does not
/// resolve is reported as `None` and never as an error.
pub trait VmIntrospect {
    /// Kind of the value at `index`
    fn value_kind(&self, index: StackIndex) -> Option<ValueKind>;

    /// Descriptor attached to the value at `index`
    ///
    /// Only consulted for tables and userdata.
    fn attached_descriptor(&self, index: StackIndex) -> Option<DescriptorId>;

    /// Visit every live tracked allocation
    ///
    /// The visitor must not call back into the VM.
    fn for_each_allocation(&self, visit: &mut dyn FnMut(Allocation));

    /// Write the VM's memory dump to `sink`
    ///
    /// For each category in use the VM calls `labels` (when given) and then
    /// writes that category's record. The format is owned by the VM.
    fn write_memory_dump(
        &self,
        sink: &mut dyn Write,
        labels: Option<&dyn Fn(&Self, MemoryCategory) -> String>,
    ) -> io::Result<()>;
}
