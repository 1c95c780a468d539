//! Memory category accounting
//!
//! The VM tags every tracked allocation with a small category id. This module
//! relays those ids to the host in two ways:
//!
//! - [`dump_memory_categories`]: the VM writes its own dump format to a sink,
//!   calling the host's label resolver while it walks its heap.
//! - [`category_usage`] / [`memory_report`]: the walk is materialized first,
//!   and labels are resolved after it has finished.
//!
//! Label resolvers receive a shared borrow of the VM. They must be pure: no
//! allocation through the VM, no collection, no re-entry into the VM from
//! another handle.

use crate::{ValueKind, VmIntrospect};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

/// Memory category id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct MemoryCategory(pub u8);

impl MemoryCategory {
    /// Category every allocation starts in
    pub const MAIN: MemoryCategory = MemoryCategory(0);

    /// Number of distinct categories
    pub const COUNT: usize = 256;

    /// Raw id
    #[inline]
    pub fn id(self) -> u8 {
        self.0
    }

    /// Index into per-category tables
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for MemoryCategory {
    fn from(id: u8) -> Self {
        MemoryCategory(id)
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live tracked allocation, as reported by the VM's walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Kind of object occupying the allocation
    pub kind: ValueKind,
    /// Category the allocation is charged to
    pub category: MemoryCategory,
    /// Size in bytes, including VM bookkeeping
    pub size: usize,
}

/// Aggregate usage of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryUsage {
    /// Category id
    pub category: MemoryCategory,
    /// Total bytes charged to the category
    pub bytes: usize,
    /// Number of live allocations in the category
    pub objects: usize,
}

/// Labeled usage of one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledUsage {
    /// Category id
    pub category: MemoryCategory,
    /// Label returned by the resolver
    pub label: String,
    /// Total bytes charged to the category
    pub bytes: usize,
    /// Number of live allocations in the category
    pub objects: usize,
}

/// Materialized memory report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryReport {
    /// Bytes across all categories
    pub total_bytes: usize,
    /// Allocations across all categories
    pub total_objects: usize,
    /// Categories in use, sorted by id
    pub categories: Vec<LabeledUsage>,
}

impl MemoryReport {
    /// Usage of one category, if it is in use
    pub fn category(&self, category: MemoryCategory) -> Option<&LabeledUsage> {
        self.categories.iter().find(|usage| usage.category == category)
    }
}

/// Drive the VM's memory dump into `sink`
///
/// The VM walks its live allocations and calls `resolver` for each category
/// in use before writing that category's record. The record format belongs
/// to the VM.
///
/// The sink is borrowed, never opened or closed here. Write failures are not
/// reported to the caller: the dump is best-effort, and a failure only shows
/// up as a `warn` event.
pub fn dump_memory_categories<V, F>(vm: &V, sink: &mut dyn Write, resolver: F)
where
    V: VmIntrospect + ?Sized,
    F: Fn(&V, MemoryCategory) -> String,
{
    tracing::debug!("memory dump started");
    let result = vm.write_memory_dump(sink, Some(&resolver));
    finish_dump(result);
}

/// Drive the VM's memory dump without category labels
pub fn dump_memory<V>(vm: &V, sink: &mut dyn Write)
where
    V: VmIntrospect + ?Sized,
{
    tracing::debug!("memory dump started (unlabeled)");
    let result = vm.write_memory_dump(sink, None);
    finish_dump(result);
}

fn finish_dump(result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!("memory dump finished"),
        Err(e) => tracing::warn!(error = %e, "memory dump sink rejected a write"),
    }
}

/// Aggregate the VM's live allocations by category
///
/// Returns only categories in use, sorted by id.
pub fn category_usage<V>(vm: &V) -> Vec<CategoryUsage>
where
    V: VmIntrospect + ?Sized,
{
    let mut totals: BTreeMap<MemoryCategory, CategoryUsage> = BTreeMap::new();

    vm.for_each_allocation(&mut |allocation: Allocation| {
        let usage = totals
            .entry(allocation.category)
            .or_insert_with(|| CategoryUsage {
                category: allocation.category,
                bytes: 0,
                objects: 0,
            });
        usage.bytes += allocation.size;
        usage.objects += 1;
    });

    totals.into_values().collect()
}

/// Aggregate and label the VM's live allocations
///
/// The walk completes before `resolver` is called, so the resolver runs
/// outside the VM's heap traversal.
pub fn memory_report<V, F>(vm: &V, resolver: F) -> MemoryReport
where
    V: VmIntrospect + ?Sized,
    F: Fn(&V, MemoryCategory) -> String,
{
    let usage = category_usage(vm);

    let categories: Vec<LabeledUsage> = usage
        .into_iter()
        .map(|usage| LabeledUsage {
            category: usage.category,
            label: resolver(vm, usage.category),
            bytes: usage.bytes,
            objects: usage.objects,
        })
        .collect();

    MemoryReport {
        total_bytes: categories.iter().map(|c| c.bytes).sum(),
        total_objects: categories.iter().map(|c| c.objects).sum(),
        categories,
    }
}
