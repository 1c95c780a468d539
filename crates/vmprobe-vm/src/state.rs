//! VM state
//!
//! [`VmState`] owns a value stack and a heap. It exposes the handful of
//! stack operations a host needs to build tables, userdata and metatable
//! links, and implements [`VmIntrospect`] so the bridge can inspect it.
//!
//! # Stack indices
//!
//! - `1..=top()` address slots from the bottom of the stack
//! - `-1..=-top()` address slots from the top
//! - [`REGISTRY_INDEX`], [`GLOBALS_INDEX`] and [`ENVIRON_INDEX`] address
//!   the registry and globals tables
//!
//! Anything else does not resolve: queries return `None`, mutations fail
//! with [`VmError::InvalidIndex`].

use crate::defaults::{
    DEFAULT_MAX_HEAP_BYTES, DEFAULT_MAX_STACK_SLOTS, ENVIRON_INDEX, GLOBALS_INDEX, REGISTRY_INDEX,
};
use crate::dump;
use crate::gc::{GcPtr, Heap};
use crate::object::{zeroed_block, Buffer, Function, HeapObject, Table, Userdata, VmString};
use crate::stack::Stack;
use crate::value::Value;
use crate::{VmError, VmResult};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use vmprobe_bridge::{
    Allocation, DescriptorId, MemoryCategory, StackIndex, ValueKind, VmIntrospect,
};

/// VM construction options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Maximum number of stack slots
    pub max_stack_slots: usize,
    /// Heap limit in bytes (0 = unlimited)
    pub max_heap_bytes: usize,
    /// Memory category new allocations are charged to
    pub initial_category: u8,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_stack_slots: DEFAULT_MAX_STACK_SLOTS,
            max_heap_bytes: DEFAULT_MAX_HEAP_BYTES,
            initial_category: MemoryCategory::MAIN.id(),
        }
    }
}

/// A VM state: value stack, heap, registry and globals
///
/// Not `Send` or `Sync`: a state is driven by one thread at a time.
pub struct VmState {
    stack: Stack,
    registry: GcPtr<Table>,
    globals: GcPtr<Table>,
    category: MemoryCategory,
    options: VmOptions,
    // Declared last: every GcPtr above points into it.
    heap: Heap,
}

impl VmState {
    /// Create a state with an empty stack, a registry and a globals table
    pub fn new(options: VmOptions) -> VmResult<Self> {
        let category = MemoryCategory(options.initial_category);
        let mut heap = Heap::new(options.max_heap_bytes);

        let registry = heap.allocate(Table::default(), category)?;
        let globals = heap.allocate(Table::default(), category)?;
        // SAFETY: freshly allocated, no other reference exists
        unsafe { globals.get_mut() }
            .fields
            .insert("_G".into(), Value::Table(globals));

        let state = Self {
            stack: Stack::with_capacity(options.max_stack_slots),
            registry,
            globals,
            category,
            options,
            heap,
        };
        tracing::debug!(
            max_stack_slots = state.options.max_stack_slots,
            max_heap_bytes = state.options.max_heap_bytes,
            category = %state.category,
            "VM state created"
        );
        Ok(state)
    }

    /// Options the state was created with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    // ========================================================================
    // Pushing values
    // ========================================================================

    /// Push nil
    pub fn push_nil(&mut self) -> VmResult<()> {
        self.stack.push(Value::Nil)
    }

    /// Push a boolean
    pub fn push_boolean(&mut self, value: bool) -> VmResult<()> {
        self.stack.push(Value::Boolean(value))
    }

    /// Push a number
    pub fn push_number(&mut self, value: f64) -> VmResult<()> {
        self.stack.push(Value::Number(value))
    }

    /// Push a three-component vector
    pub fn push_vector(&mut self, x: f32, y: f32, z: f32) -> VmResult<()> {
        self.stack.push(Value::Vector([x, y, z]))
    }

    /// Push a host pointer the VM does not own
    pub fn push_light_userdata(&mut self, addr: usize) -> VmResult<()> {
        self.stack.push(Value::LightUserdata(addr))
    }

    /// Push a new string
    pub fn push_string(&mut self, value: &str) -> VmResult<()> {
        let string = self.alloc(VmString { data: value.into() })?;
        self.stack.push(Value::String(string))
    }

    /// Push a new function placeholder with a debug name
    pub fn push_function(&mut self, name: &str) -> VmResult<()> {
        let function = self.alloc(Function { name: name.into() })?;
        self.stack.push(Value::Function(function))
    }

    /// Push a new table with preallocated array and record parts
    pub fn create_table(&mut self, narray: usize, nrecords: usize) -> VmResult<()> {
        let requested = Table::requested_bytes(narray, nrecords)
            .ok_or_else(|| self.heap.limit_error(usize::MAX))?;
        self.heap.check_room(requested)?;
        let table = Table::try_with_capacity(narray, nrecords)
            .map_err(|_| self.heap.limit_error(requested))?;
        let table = self.alloc(table)?;
        self.stack.push(Value::Table(table))
    }

    /// Push a new zero-filled userdata block of `size` bytes
    pub fn new_userdata(&mut self, size: usize, tag: u8) -> VmResult<()> {
        let data = self.zeroed(size)?;
        let userdata = self.alloc(Userdata {
            tag,
            data,
            metatable: None,
        })?;
        self.stack.push(Value::Userdata(userdata))
    }

    /// Push a new zero-filled buffer of `size` bytes
    pub fn new_buffer(&mut self, size: usize) -> VmResult<()> {
        let data = self.zeroed(size)?;
        let buffer = self.alloc(Buffer { data })?;
        self.stack.push(Value::Buffer(buffer))
    }

    fn zeroed(&self, size: usize) -> VmResult<Box<[u8]>> {
        self.heap.check_room(size)?;
        zeroed_block(size).map_err(|_| self.heap.limit_error(size))
    }

    fn alloc<T: HeapObject>(&mut self, object: T) -> VmResult<GcPtr<T>> {
        // Check for room first so a full stack does not leave an orphan behind
        if self.stack.depth() >= self.stack.max_slots() {
            return Err(VmError::StackOverflow);
        }
        self.heap.allocate(object, self.category)
    }

    // ========================================================================
    // Metatables and fields
    // ========================================================================

    /// Pop a table (or nil) and make it the metatable of the value at `index`
    ///
    /// # Errors
    ///
    /// - `InvalidIndex` if `index` does not resolve
    /// - `StackUnderflow` if the stack is empty
    /// - `TypeError` if the target is not a table or userdata, or the popped
    ///   value is neither a table nor nil
    pub fn set_metatable(&mut self, index: StackIndex) -> VmResult<()> {
        let target = self.value_at(index).ok_or(VmError::InvalidIndex(index))?;
        let metatable = match self.top_value()? {
            Value::Nil => None,
            Value::Table(table) => Some(table),
            other => {
                return Err(VmError::TypeError(format!(
                    "metatable must be a table or nil, got {}",
                    other.kind()
                )))
            }
        };

        // SAFETY: only Copy pointers into the heap are held here
        match target {
            Value::Table(table) => unsafe { table.get_mut() }.metatable = metatable,
            Value::Userdata(userdata) => unsafe { userdata.get_mut() }.metatable = metatable,
            other => {
                return Err(VmError::TypeError(format!(
                    "cannot set a metatable on a {} value",
                    other.kind()
                )))
            }
        }

        self.stack.pop()?;
        Ok(())
    }

    /// Push the metatable of the value at `index`
    ///
    /// Returns `false`, pushing nothing, if the value has no metatable or
    /// `index` does not resolve.
    pub fn get_metatable(&mut self, index: StackIndex) -> VmResult<bool> {
        match self.value_at(index).and_then(|value| value.metatable()) {
            Some(metatable) => {
                self.stack.push(Value::Table(metatable))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a value and store it as `t[key]`, where `t` is the table at `index`
    ///
    /// Storing nil removes the key.
    pub fn set_field(&mut self, index: StackIndex, key: &str) -> VmResult<()> {
        let table = self.table_at(index)?;
        let value = self.stack.pop()?;

        // SAFETY: only Copy pointers into the heap are held here
        let fields = &mut unsafe { table.get_mut() }.fields;
        if value == Value::Nil {
            fields.remove(key);
        } else {
            fields.insert(key.into(), value);
        }
        Ok(())
    }

    /// Push `t[key]`, where `t` is the table at `index`, and return its kind
    pub fn get_field(&mut self, index: StackIndex, key: &str) -> VmResult<ValueKind> {
        let table = self.table_at(index)?;
        let value = table.get().fields.get(key).copied().unwrap_or(Value::Nil);
        self.stack.push(value)?;
        Ok(value.kind())
    }

    fn table_at(&self, index: StackIndex) -> VmResult<GcPtr<Table>> {
        match self.value_at(index) {
            Some(Value::Table(table)) => Ok(table),
            Some(other) => Err(VmError::TypeError(format!(
                "expected a table, got {}",
                other.kind()
            ))),
            None => Err(VmError::InvalidIndex(index)),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Identity of the value at `index`
    ///
    /// Collectable values and light userdata have one; scalars and
    /// unresolvable indices give `None`.
    pub fn to_pointer(&self, index: StackIndex) -> Option<DescriptorId> {
        self.value_at(index).and_then(|value| value.identity())
    }

    /// Kind of the value at `index`
    pub fn type_at(&self, index: StackIndex) -> Option<ValueKind> {
        self.value_at(index).map(|value| value.kind())
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    /// Number of values on the stack
    pub fn top(&self) -> StackIndex {
        self.stack.depth() as StackIndex
    }

    /// Set the stack top
    ///
    /// A non-negative `index` sets the depth, filling new slots with nil. A
    /// negative one is relative to the current top: `-1` leaves the stack
    /// unchanged, `-2` pops one value.
    pub fn set_top(&mut self, index: StackIndex) -> VmResult<()> {
        if index >= 0 {
            return self.stack.set_depth(index as usize);
        }

        let depth = self.stack.depth() as i64 + index as i64 + 1;
        if depth < 0 {
            return Err(VmError::StackUnderflow);
        }
        self.stack.set_depth(depth as usize)
    }

    /// Pop `count` values
    pub fn pop(&mut self, count: usize) -> VmResult<()> {
        let depth = self
            .stack
            .depth()
            .checked_sub(count)
            .ok_or(VmError::StackUnderflow)?;
        self.stack.set_depth(depth)
    }

    // ========================================================================
    // Memory categories
    // ========================================================================

    /// Charge subsequent allocations to `category`
    pub fn set_memory_category(&mut self, category: MemoryCategory) {
        self.category = category;
    }

    /// Category new allocations are charged to
    pub fn memory_category(&self) -> MemoryCategory {
        self.category
    }

    /// Bytes charged across all categories
    pub fn total_bytes(&self) -> usize {
        self.heap.allocated_bytes()
    }

    /// Bytes charged to `category`
    pub fn category_bytes(&self, category: MemoryCategory) -> usize {
        self.heap.category_bytes(category)
    }

    /// Number of live heap objects
    pub fn allocation_count(&self) -> usize {
        self.heap.allocation_count()
    }

    // ========================================================================
    // Internals shared with the dump
    // ========================================================================

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn registry_id(&self) -> DescriptorId {
        self.registry.identity()
    }

    pub(crate) fn globals_id(&self) -> DescriptorId {
        self.globals.identity()
    }

    fn top_value(&self) -> VmResult<Value> {
        self.stack
            .depth()
            .checked_sub(1)
            .and_then(|pos| self.stack.get(pos))
            .ok_or(VmError::StackUnderflow)
    }

    fn value_at(&self, index: StackIndex) -> Option<Value> {
        match index {
            REGISTRY_INDEX => Some(Value::Table(self.registry)),
            GLOBALS_INDEX | ENVIRON_INDEX => Some(Value::Table(self.globals)),
            _ => self
                .stack_position(index)
                .and_then(|pos| self.stack.get(pos)),
        }
    }

    fn stack_position(&self, index: StackIndex) -> Option<usize> {
        if index > 0 {
            Some(index as usize - 1)
        } else if index < 0 && index > REGISTRY_INDEX {
            usize::try_from(self.stack.depth() as i64 + index as i64).ok()
        } else {
            None
        }
    }
}

impl VmIntrospect for VmState {
    fn value_kind(&self, index: StackIndex) -> Option<ValueKind> {
        self.type_at(index)
    }

    fn attached_descriptor(&self, index: StackIndex) -> Option<DescriptorId> {
        self.value_at(index)
            .and_then(|value| value.metatable())
            .map(|metatable| metatable.identity())
    }

    fn for_each_allocation(&self, visit: &mut dyn FnMut(Allocation)) {
        for header in self.heap.iter_allocations() {
            visit(Allocation {
                kind: header.kind(),
                category: header.category(),
                size: header.footprint(),
            });
        }
    }

    fn write_memory_dump(
        &self,
        sink: &mut dyn Write,
        labels: Option<&dyn Fn(&Self, MemoryCategory) -> String>,
    ) -> io::Result<()> {
        dump::write_dump(self, sink, labels)
    }
}

impl Drop for VmState {
    fn drop(&mut self) {
        tracing::debug!(
            objects = self.heap.allocation_count(),
            bytes = self.heap.allocated_bytes(),
            "VM state closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_state() -> VmState {
        VmState::new(VmOptions::default()).unwrap()
    }

    #[test]
    fn test_new_state() {
        let state = new_state();
        assert_eq!(state.top(), 0);
        assert_eq!(state.allocation_count(), 2);
        assert_eq!(state.total_bytes(), state.category_bytes(MemoryCategory::MAIN));
        assert_eq!(state.options().max_stack_slots, DEFAULT_MAX_STACK_SLOTS);
    }

    #[test]
    fn test_index_resolution() {
        let mut state = new_state();
        state.push_number(1.0).unwrap();
        state.push_boolean(true).unwrap();
        state.push_nil().unwrap();

        assert_eq!(state.type_at(1), Some(ValueKind::Number));
        assert_eq!(state.type_at(2), Some(ValueKind::Boolean));
        assert_eq!(state.type_at(-1), Some(ValueKind::Nil));
        assert_eq!(state.type_at(-3), Some(ValueKind::Number));

        assert_eq!(state.type_at(0), None);
        assert_eq!(state.type_at(4), None);
        assert_eq!(state.type_at(-4), None);
        assert_eq!(state.type_at(REGISTRY_INDEX + 1), None);
        assert_eq!(state.type_at(StackIndex::MIN), None);

        assert_eq!(state.type_at(REGISTRY_INDEX), Some(ValueKind::Table));
        assert_eq!(state.type_at(GLOBALS_INDEX), Some(ValueKind::Table));
        assert_eq!(state.to_pointer(GLOBALS_INDEX), state.to_pointer(ENVIRON_INDEX));
        assert_ne!(state.to_pointer(GLOBALS_INDEX), state.to_pointer(REGISTRY_INDEX));
    }

    #[test]
    fn test_set_top_and_pop() {
        let mut state = new_state();
        state.set_top(3).unwrap();
        assert_eq!(state.top(), 3);
        assert_eq!(state.type_at(3), Some(ValueKind::Nil));

        state.set_top(-1).unwrap();
        assert_eq!(state.top(), 3);
        state.set_top(-2).unwrap();
        assert_eq!(state.top(), 2);

        state.pop(2).unwrap();
        assert_eq!(state.top(), 0);
        assert!(matches!(state.pop(1), Err(VmError::StackUnderflow)));
        assert!(matches!(state.set_top(-2), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn test_stack_limit() {
        let mut state = VmState::new(VmOptions {
            max_stack_slots: 1,
            ..VmOptions::default()
        })
        .unwrap();

        state.push_nil().unwrap();
        let before = state.allocation_count();
        assert!(matches!(state.create_table(0, 0), Err(VmError::StackOverflow)));
        assert_eq!(state.allocation_count(), before);
    }

    #[test]
    fn test_heap_limit() {
        let mut state = VmState::new(VmOptions {
            max_heap_bytes: 4096,
            ..VmOptions::default()
        })
        .unwrap();

        let err = state.new_userdata(8192, 0).unwrap_err();
        assert!(matches!(err, VmError::HeapLimit { limit: 4096, .. }));
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_oversized_allocation_under_limit() {
        let mut state = VmState::new(VmOptions {
            max_heap_bytes: 4096,
            ..VmOptions::default()
        })
        .unwrap();
        let before = state.allocation_count();

        let err = state.new_userdata(usize::MAX, 0).unwrap_err();
        assert!(matches!(err, VmError::HeapLimit { limit: 4096, .. }));
        let err = state.new_buffer(usize::MAX / 2 + 1).unwrap_err();
        assert!(matches!(err, VmError::HeapLimit { limit: 4096, .. }));
        let err = state.create_table(usize::MAX, usize::MAX).unwrap_err();
        assert!(matches!(err, VmError::HeapLimit { limit: 4096, .. }));

        assert_eq!(state.top(), 0);
        assert_eq!(state.allocation_count(), before);
    }

    #[test]
    fn test_oversized_allocation_without_limit() {
        let mut state = new_state();
        let before = state.total_bytes();

        for result in [
            state.new_userdata(usize::MAX, 0),
            state.new_buffer(usize::MAX / 2 + 1),
            state.create_table(usize::MAX / 2, 0),
        ] {
            assert!(matches!(result, Err(VmError::HeapLimit { limit: 0, .. })));
        }

        assert_eq!(state.top(), 0);
        assert_eq!(state.total_bytes(), before);
        state.new_buffer(16).unwrap();
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_metatable_roundtrip() {
        let mut state = new_state();
        state.create_table(0, 0).unwrap();
        assert!(!state.get_metatable(-1).unwrap());

        state.create_table(0, 0).unwrap();
        let metatable = state.to_pointer(-1);
        state.set_metatable(-2).unwrap();
        assert_eq!(state.top(), 1);

        assert!(state.get_metatable(-1).unwrap());
        assert_eq!(state.to_pointer(-1), metatable);
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_clear_metatable() {
        let mut state = new_state();
        state.new_userdata(16, 1).unwrap();
        state.create_table(0, 0).unwrap();
        state.set_metatable(1).unwrap();
        assert!(state.attached_descriptor(1).is_some());

        state.push_nil().unwrap();
        state.set_metatable(1).unwrap();
        assert_eq!(state.attached_descriptor(1), None);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_set_metatable_errors() {
        let mut state = new_state();
        state.push_number(1.0).unwrap();
        state.create_table(0, 0).unwrap();
        assert!(matches!(state.set_metatable(1), Err(VmError::TypeError(_))));
        assert_eq!(state.top(), 2);

        state.push_boolean(true).unwrap();
        assert!(matches!(state.set_metatable(2), Err(VmError::TypeError(_))));
        assert!(matches!(state.set_metatable(9), Err(VmError::InvalidIndex(9))));
    }

    #[test]
    fn test_fields() {
        let mut state = new_state();
        state.push_number(42.0).unwrap();
        state.set_field(GLOBALS_INDEX, "answer").unwrap();
        assert_eq!(state.top(), 0);

        assert_eq!(state.get_field(GLOBALS_INDEX, "answer").unwrap(), ValueKind::Number);
        assert_eq!(state.get_field(GLOBALS_INDEX, "missing").unwrap(), ValueKind::Nil);
        assert_eq!(state.get_field(GLOBALS_INDEX, "_G").unwrap(), ValueKind::Table);
        assert_eq!(state.to_pointer(-1), state.to_pointer(GLOBALS_INDEX));

        state.push_nil().unwrap();
        state.set_field(GLOBALS_INDEX, "answer").unwrap();
        assert_eq!(state.get_field(GLOBALS_INDEX, "answer").unwrap(), ValueKind::Nil);

        state.push_number(1.0).unwrap();
        assert!(matches!(state.set_field(-1, "x"), Err(VmError::TypeError(_))));
    }

    #[test]
    fn test_memory_categories() {
        let mut state = new_state();
        let main_before = state.category_bytes(MemoryCategory::MAIN);

        state.set_memory_category(MemoryCategory(7));
        assert_eq!(state.memory_category(), MemoryCategory(7));
        state.new_userdata(256, 0).unwrap();

        assert!(state.category_bytes(MemoryCategory(7)) >= 256);
        assert_eq!(state.category_bytes(MemoryCategory::MAIN), main_before);
        assert_eq!(
            state.total_bytes(),
            main_before + state.category_bytes(MemoryCategory(7))
        );
    }

    #[test]
    fn test_to_pointer() {
        let mut state = new_state();
        state.push_number(1.0).unwrap();
        state.push_light_userdata(0x1234).unwrap();
        state.push_string("hi").unwrap();
        state.push_string("hi").unwrap();

        assert_eq!(state.to_pointer(1), None);
        assert_eq!(state.to_pointer(2).map(|id| id.addr()), Some(0x1234));
        assert!(state.to_pointer(3).is_some());
        assert_ne!(state.to_pointer(3), state.to_pointer(4));
    }

    #[test]
    fn test_options_from_json() {
        let options: VmOptions = serde_json::from_str(r#"{"max_heap_bytes": 1024}"#).unwrap();
        assert_eq!(options.max_heap_bytes, 1024);
        assert_eq!(options.max_stack_slots, DEFAULT_MAX_STACK_SLOTS);
        assert_eq!(options.initial_category, 0);
    }
}
