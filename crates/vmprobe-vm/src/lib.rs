//! vmprobe reference VM
//!
//! A minimal VM state for exercising the introspection bridge: a value
//! stack, a heap of tables, userdata, strings, buffers and function
//! placeholders, metatable links, and per-allocation memory categories.
//! There is no interpreter and no collector; objects live until the state is
//! dropped.
//!
//! ```ignore
//! use vmprobe_bridge::associated_descriptor;
//! use vmprobe_vm::{VmOptions, VmState};
//!
//! let mut vm = VmState::new(VmOptions::default())?;
//! vm.create_table(0, 0)?;
//! vm.create_table(0, 0)?;
//! let metatable = vm.to_pointer(-1);
//! vm.set_metatable(-2)?;
//! assert_eq!(associated_descriptor(&vm, -1), metatable);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
mod dump;
pub mod flags;
mod gc;
mod object;
mod stack;
mod state;
mod value;

pub use defaults::{ENVIRON_INDEX, GLOBALS_INDEX, REGISTRY_INDEX};
pub use flags::{register_flags, DEBUG_DUMP_OBJECTS};
pub use state::{VmOptions, VmState};

/// VM errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Index does not resolve to a value
    #[error("Invalid stack index: {0}")]
    InvalidIndex(i32),

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Allocation would exceed the heap limit
    #[error("Heap limit exceeded: {requested} bytes requested, limit is {limit}")]
    HeapLimit {
        /// Bytes the allocation needed
        requested: usize,
        /// Configured limit
        limit: usize,
    },
}

/// VM result
pub type VmResult<T> = Result<T, VmError>;
