//! Flag registry
//!
//! A [`FlagRegistry`] links `&'static Flag`s together for lookup by name. It
//! never owns flag storage and never removes entries.
//!
//! The registry is built by a `const fn`, so the process-wide instance is a
//! plain `static` that is valid (and empty) before any code runs. Registration
//! is explicit and expected to happen during startup; [`FlagRegistry::seal`]
//! turns late registration into an error.

use crate::flag::{Flag, FlagInfo};
use crate::{FlagError, FlagResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name-indexed set of flags
pub struct FlagRegistry {
    flags: RwLock<Vec<&'static Flag>>,
    sealed: AtomicBool,
}

impl FlagRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            flags: parking_lot::const_rwlock(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Register a flag
    ///
    /// Fails if a flag with the same name is already registered, or if the
    /// registry has been sealed. A failed registration leaves the registry
    /// unchanged.
    pub fn register(&self, flag: &'static Flag) -> FlagResult<()> {
        let mut flags = self.flags.write();

        if self.sealed.load(Ordering::Acquire) {
            return Err(FlagError::RegistrySealed(flag.name().to_string()));
        }
        if flags.iter().any(|f| f.name() == flag.name()) {
            return Err(FlagError::DuplicateFlag(flag.name().to_string()));
        }

        flags.push(flag);
        tracing::debug!(flag = flag.name(), value = flag.get(), "flag registered");
        Ok(())
    }

    /// Register several flags, stopping at the first failure
    ///
    /// Flags before the failing one stay registered.
    pub fn register_all(&self, flags: &[&'static Flag]) -> FlagResult<()> {
        for &flag in flags {
            self.register(flag)?;
        }
        Ok(())
    }

    /// Find a flag by exact name
    ///
    /// Linear scan; registries hold tens of flags and lookups happen during
    /// configuration, not on hot paths.
    pub fn lookup(&self, name: &str) -> Option<&'static Flag> {
        let found = self
            .flags
            .read()
            .iter()
            .copied()
            .find(|flag| flag.name().as_bytes() == name.as_bytes());
        tracing::trace!(flag = name, found = found.is_some(), "flag lookup");
        found
    }

    /// Set a flag by name
    ///
    /// Returns `false`, changing nothing, when no flag has that name.
    pub fn set_by_name(&self, name: &str, value: bool) -> bool {
        match self.lookup(name) {
            Some(flag) => {
                flag.set(value);
                true
            }
            None => false,
        }
    }

    /// Current value of a flag, if registered
    pub fn get(&self, name: &str) -> Option<bool> {
        self.lookup(name).map(Flag::get)
    }

    /// Check whether a flag is registered
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Reject further registrations
    pub fn seal(&self) {
        let _flags = self.flags.write();
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether [`seal`](Self::seal) has been called
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Restore every flag to its declared value
    pub fn reset_all(&self) {
        for flag in self.flags.read().iter() {
            flag.reset();
        }
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.flags.read().iter().map(|flag| flag.name()).collect()
    }

    /// State of every flag, in registration order
    pub fn snapshot(&self) -> Vec<FlagInfo> {
        self.flags.read().iter().map(|flag| flag.info()).collect()
    }

    /// Number of registered flags
    pub fn len(&self) -> usize {
        self.flags.read().len()
    }

    /// Check if no flag is registered
    pub fn is_empty(&self) -> bool {
        self.flags.read().is_empty()
    }
}

impl Default for FlagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagRegistry")
            .field("count", &self.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
