//! vmprobe runtime flags
//!
//! This crate provides a registry of named boolean switches used to toggle
//! experimental or diagnostic VM behavior at runtime:
//! - [`Flag`]: a `static`, `const`-constructible switch
//! - [`FlagRegistry`]: name-based lookup and mutation
//! - [`FlagOverrides`]: assignments read from config files or the environment
//!
//! The process-wide registry is [`global()`]. It is const-initialized, so it
//! is usable before `main` and needs no setup call. All registrations are
//! expected to complete during startup, before the first lookup; call
//! [`FlagRegistry::seal`] to enforce that.
//!
//! ```ignore
//! use vmprobe_flags::{define_flag, global};
//!
//! define_flag!(pub FAST_PATH, "FastPath", false);
//!
//! global().register(&FAST_PATH)?;
//! assert!(global().set_by_name("FastPath", true));
//! assert!(FAST_PATH.get());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod flag;
pub mod overrides;
pub mod registry;

pub use flag::{Flag, FlagInfo, ScopedFlag};
pub use overrides::{ApplyReport, FlagOverrides, FLAGS_ENV_VAR};
pub use registry::FlagRegistry;

/// Flag registry errors
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    /// A flag with this name is already registered
    #[error("Flag already registered: {0}")]
    DuplicateFlag(String),

    /// Registration attempted after the registry was sealed
    #[error("Flag registry is sealed, cannot register {0}")]
    RegistrySealed(String),

    /// Malformed entry in a flag override list
    #[error("Invalid flag override '{entry}': {reason}")]
    InvalidOverride {
        /// Offending entry
        entry: String,
        /// What was wrong with it
        reason: String,
    },

    /// Failed to parse an overrides file
    #[error("Failed to parse flag overrides: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to read an overrides file
    #[error("Failed to read flag overrides: {0}")]
    Io(#[from] std::io::Error),
}

/// Flag registry result
pub type FlagResult<T> = Result<T, FlagError>;

static GLOBAL_FLAGS: FlagRegistry = FlagRegistry::new();

/// The process-wide flag registry
pub fn global() -> &'static FlagRegistry {
    &GLOBAL_FLAGS
}

/// Register a flag in the process-wide registry
pub fn register(flag: &'static Flag) -> FlagResult<()> {
    GLOBAL_FLAGS.register(flag)
}

/// Look up a flag in the process-wide registry
pub fn lookup(name: &str) -> Option<&'static Flag> {
    GLOBAL_FLAGS.lookup(name)
}

/// Set a flag in the process-wide registry; `false` if it is not registered
pub fn set_by_name(name: &str, value: bool) -> bool {
    GLOBAL_FLAGS.set_by_name(name, value)
}
