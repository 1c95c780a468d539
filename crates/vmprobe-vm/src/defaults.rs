//! Default constants for VM configuration.

/// Default maximum number of stack slots.
pub const DEFAULT_MAX_STACK_SLOTS: usize = 100_000;

/// Default heap limit in bytes (0 = unlimited).
pub const DEFAULT_MAX_HEAP_BYTES: usize = 0;

/// Upper bound on addressable stack slots; pseudo-indices sit below it.
pub const MAX_C_STACK: i32 = 1_000_000;

/// Pseudo-index of the registry table.
pub const REGISTRY_INDEX: i32 = -MAX_C_STACK - 2000;

/// Pseudo-index of the current environment (the globals table here).
pub const ENVIRON_INDEX: i32 = -MAX_C_STACK - 2001;

/// Pseudo-index of the globals table.
pub const GLOBALS_INDEX: i32 = -MAX_C_STACK - 2002;
