//! Bridge contract tests against a scripted VM
//!
//! The VM here is a fixed list of stack slots and allocations, so each test
//! controls exactly what the bridge sees.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::{self, Write};

use vmprobe_bridge::{
    associated_descriptor, category_usage, dump_memory, dump_memory_categories, memory_report,
    Allocation, DescriptorId, MemoryCategory, StackIndex, ValueKind, VmIntrospect,
};

#[derive(Default)]
struct ScriptedVm {
    stack: Vec<(ValueKind, Option<DescriptorId>)>,
    allocations: Vec<Allocation>,
    /// Descriptor queries that reached the VM
    descriptor_calls: Cell<usize>,
}

impl ScriptedVm {
    fn push(&mut self, kind: ValueKind, descriptor: Option<usize>) {
        self.stack
            .push((kind, descriptor.and_then(DescriptorId::from_addr)));
    }

    fn allocate(&mut self, kind: ValueKind, category: u8, size: usize) {
        self.allocations.push(Allocation {
            kind,
            category: MemoryCategory(category),
            size,
        });
    }

    fn slot(&self, index: StackIndex) -> Option<&(ValueKind, Option<DescriptorId>)> {
        let top = self.stack.len() as i64;
        let index = index as i64;
        let pos = if index > 0 {
            index - 1
        } else if index < 0 {
            top + index
        } else {
            return None;
        };
        if pos < 0 || pos >= top {
            return None;
        }
        self.stack.get(pos as usize)
    }
}

impl VmIntrospect for ScriptedVm {
    fn value_kind(&self, index: StackIndex) -> Option<ValueKind> {
        self.slot(index).map(|(kind, _)| *kind)
    }

    fn attached_descriptor(&self, index: StackIndex) -> Option<DescriptorId> {
        self.descriptor_calls.set(self.descriptor_calls.get() + 1);
        self.slot(index).and_then(|(_, descriptor)| *descriptor)
    }

    fn for_each_allocation(&self, visit: &mut dyn FnMut(Allocation)) {
        for allocation in &self.allocations {
            visit(*allocation);
        }
    }

    fn write_memory_dump(
        &self,
        sink: &mut dyn Write,
        labels: Option<&dyn Fn(&Self, MemoryCategory) -> String>,
    ) -> io::Result<()> {
        let mut totals: BTreeMap<MemoryCategory, usize> = BTreeMap::new();
        for allocation in &self.allocations {
            *totals.entry(allocation.category).or_default() += allocation.size;
        }
        for (category, bytes) in totals {
            match labels {
                Some(label) => writeln!(sink, "{} {} {}", category, label(self, category), bytes)?,
                None => writeln!(sink, "{} {}", category, bytes)?,
            }
        }
        Ok(())
    }
}

struct BrokenSink;

impl Write for BrokenSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ===== Descriptor query =====

#[test]
fn test_descriptor_of_table_and_userdata() {
    let mut vm = ScriptedVm::default();
    vm.push(ValueKind::Table, Some(0x1000));
    vm.push(ValueKind::Userdata, Some(0x2000));
    vm.push(ValueKind::Table, None);

    assert_eq!(associated_descriptor(&vm, 1).map(|d| d.addr()), Some(0x1000));
    assert_eq!(associated_descriptor(&vm, 2).map(|d| d.addr()), Some(0x2000));
    assert_eq!(associated_descriptor(&vm, 3), None);
    assert_eq!(associated_descriptor(&vm, -3).map(|d| d.addr()), Some(0x1000));
}

#[test]
fn test_descriptor_ignored_for_other_kinds() {
    let mut vm = ScriptedVm::default();
    for kind in [
        ValueKind::Nil,
        ValueKind::Boolean,
        ValueKind::Number,
        ValueKind::String,
        ValueKind::Function,
        ValueKind::LightUserdata,
        ValueKind::Buffer,
    ] {
        // Even if the VM reported a descriptor, the bridge must not surface it
        vm.push(kind, Some(0x3000));
    }

    for index in 1..=vm.stack.len() as StackIndex {
        assert_eq!(associated_descriptor(&vm, index), None, "index {}", index);
    }
    assert_eq!(vm.descriptor_calls.get(), 0);
}

#[test]
fn test_descriptor_invalid_index() {
    let mut vm = ScriptedVm::default();
    vm.push(ValueKind::Table, Some(0x1000));

    assert_eq!(associated_descriptor(&vm, 0), None);
    assert_eq!(associated_descriptor(&vm, 2), None);
    assert_eq!(associated_descriptor(&vm, -2), None);
    assert_eq!(associated_descriptor(&vm, StackIndex::MIN), None);
}

// ===== Memory dump =====

#[test]
fn test_dump_invokes_resolver_per_category() {
    let mut vm = ScriptedVm::default();
    vm.allocate(ValueKind::Table, 0, 64);
    vm.allocate(ValueKind::String, 0, 32);
    vm.allocate(ValueKind::Userdata, 5, 128);

    let seen = RefCell::new(Vec::new());
    let mut out = Vec::new();
    dump_memory_categories(&vm, &mut out, |_vm, category| {
        seen.borrow_mut().push(category);
        format!("cat{}", category)
    });

    assert_eq!(*seen.borrow(), vec![MemoryCategory(0), MemoryCategory(5)]);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "0 cat0 96\n5 cat5 128\n");
}

#[test]
fn test_dump_empty_vm() {
    let vm = ScriptedVm::default();
    let calls = Cell::new(0);
    let mut out = Vec::new();

    dump_memory_categories(&vm, &mut out, |_vm, _category| {
        calls.set(calls.get() + 1);
        String::new()
    });

    assert_eq!(calls.get(), 0);
    assert!(out.is_empty());
}

#[test]
fn test_dump_unlabeled() {
    let mut vm = ScriptedVm::default();
    vm.allocate(ValueKind::Table, 3, 10);

    let mut out = Vec::new();
    dump_memory(&vm, &mut out);

    assert_eq!(String::from_utf8(out).unwrap(), "3 10\n");
}

#[test]
fn test_dump_to_broken_sink_is_silent() {
    let mut vm = ScriptedVm::default();
    vm.allocate(ValueKind::Table, 0, 10);

    let mut sink = BrokenSink;
    dump_memory_categories(&vm, &mut sink, |_vm, _category| "main".to_string());
}

// ===== Materialized usage =====

#[test]
fn test_category_usage_aggregates() {
    let mut vm = ScriptedVm::default();
    vm.allocate(ValueKind::Table, 2, 40);
    vm.allocate(ValueKind::Table, 0, 8);
    vm.allocate(ValueKind::String, 2, 24);

    let usage = category_usage(&vm);
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].category, MemoryCategory(0));
    assert_eq!((usage[0].bytes, usage[0].objects), (8, 1));
    assert_eq!(usage[1].category, MemoryCategory(2));
    assert_eq!((usage[1].bytes, usage[1].objects), (64, 2));
}

#[test]
fn test_memory_report_labels_after_walk() {
    let mut vm = ScriptedVm::default();
    vm.allocate(ValueKind::Table, 0, 100);
    vm.allocate(ValueKind::Userdata, 9, 50);

    let report = memory_report(&vm, |vm, category| {
        // The resolver may read the VM freely; the walk is already over
        format!("{}:{}", category, vm.allocations.len())
    });

    assert_eq!(report.total_bytes, 150);
    assert_eq!(report.total_objects, 2);
    assert_eq!(report.category(MemoryCategory(9)).unwrap().label, "9:2");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["categories"][0]["category"], 0);
    assert_eq!(json["categories"][1]["label"], "9:2");
}
