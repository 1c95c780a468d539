//! Named boolean switches
//!
//! A [`Flag`] is declared as a `static` and lives for the whole process.
//! Its value can be flipped at runtime either directly or by name through a
//! [`FlagRegistry`](crate::FlagRegistry).

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// A named, mutable, process-lifetime boolean switch
///
/// The value is stored in an [`AtomicBool`] with relaxed ordering: readers
/// always observe a whole value, but a flip is not a synchronization point
/// for other memory.
pub struct Flag {
    name: &'static str,
    default: bool,
    value: AtomicBool,
}

impl Flag {
    /// Create a flag with the given name and initial value
    ///
    /// This is a `const fn` so flags can be plain statics:
    ///
    /// ```ignore
    /// static FAST_PATH: Flag = Flag::new("FastPath", false);
    /// ```
    pub const fn new(name: &'static str, default: bool) -> Self {
        Self {
            name,
            default,
            value: AtomicBool::new(default),
        }
    }

    /// Flag name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Relaxed)
    }

    /// Overwrite the value, returning the previous one
    pub fn set(&self, value: bool) -> bool {
        let previous = self.value.swap(value, Ordering::Relaxed);
        if previous != value {
            tracing::debug!(flag = self.name, value, "flag changed");
        }
        previous
    }

    /// Value the flag was declared with
    #[inline]
    pub fn default_value(&self) -> bool {
        self.default
    }

    /// Restore the declared value
    pub fn reset(&self) {
        self.set(self.default);
    }

    /// Point-in-time view of this flag
    pub fn info(&self) -> FlagInfo {
        FlagInfo {
            name: self.name,
            value: self.get(),
            default: self.default,
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.name)
            .field("value", &self.get())
            .field("default", &self.default)
            .finish()
    }
}

/// Snapshot of a flag's state, suitable for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagInfo {
    /// Flag name
    pub name: &'static str,
    /// Value at the time of the snapshot
    pub value: bool,
    /// Declared value
    pub default: bool,
}

/// Sets a flag for the lifetime of the guard
///
/// The previous value is restored when the guard is dropped. Mostly useful
/// in tests that need a flag flipped for a single scope.
#[must_use = "the flag is restored as soon as the guard is dropped"]
pub struct ScopedFlag {
    flag: &'static Flag,
    previous: bool,
}

impl ScopedFlag {
    /// Set `flag` to `value` until the returned guard goes out of scope
    pub fn new(flag: &'static Flag, value: bool) -> Self {
        let previous = flag.set(value);
        Self { flag, previous }
    }
}

impl Drop for ScopedFlag {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// Declare a [`Flag`] static
///
/// ```ignore
/// define_flag!(pub FAST_PATH, "FastPath", false);
/// ```
///
/// Declaring a flag does not register it; pass it to
/// [`FlagRegistry::register`](crate::FlagRegistry::register) during startup.
#[macro_export]
macro_rules! define_flag {
    ($(#[$meta:meta])* $vis:vis $ident:ident, $name:literal, $default:expr) => {
        $(#[$meta])*
        $vis static $ident: $crate::Flag = $crate::Flag::new($name, $default);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_initial_value() {
        static ON: Flag = Flag::new("On", true);
        static OFF: Flag = Flag::new("Off", false);

        assert!(ON.get());
        assert!(!OFF.get());
        assert_eq!(ON.name(), "On");
    }

    #[test]
    fn test_flag_set_returns_previous() {
        static FLAG: Flag = Flag::new("SetReturnsPrevious", false);

        assert!(!FLAG.set(true));
        assert!(FLAG.set(true));
        assert!(FLAG.get());
    }

    #[test]
    fn test_flag_reset() {
        static FLAG: Flag = Flag::new("Reset", true);

        FLAG.set(false);
        assert!(!FLAG.get());
        FLAG.reset();
        assert!(FLAG.get());
        assert!(FLAG.default_value());
    }

    #[test]
    fn test_scoped_flag_restores() {
        static FLAG: Flag = Flag::new("Scoped", false);

        {
            let _guard = ScopedFlag::new(&FLAG, true);
            assert!(FLAG.get());
        }
        assert!(!FLAG.get());
    }

    #[test]
    fn test_scoped_flag_nested() {
        static FLAG: Flag = Flag::new("ScopedNested", false);

        let outer = ScopedFlag::new(&FLAG, true);
        {
            let _inner = ScopedFlag::new(&FLAG, false);
            assert!(!FLAG.get());
        }
        assert!(FLAG.get());
        drop(outer);
        assert!(!FLAG.get());
    }

    #[test]
    fn test_define_flag_macro() {
        define_flag!(MACRO_FLAG, "MacroFlag", true);

        assert_eq!(MACRO_FLAG.name(), "MacroFlag");
        assert!(MACRO_FLAG.get());
    }

    #[test]
    fn test_flag_info() {
        static FLAG: Flag = Flag::new("Info", false);

        let info = FLAG.info();
        assert_eq!(info.name, "Info");
        assert!(!info.value);
        assert!(!info.default);
    }
}
