//! Runtime flags read by the VM

use vmprobe_flags::{define_flag, FlagRegistry, FlagResult};

define_flag!(
    /// Include per-object records in heap dumps
    pub DEBUG_DUMP_OBJECTS,
    "DebugDumpObjects",
    true
);

/// Register the VM's flags in `registry`
///
/// Fails with `DuplicateFlag` if they are already registered there.
pub fn register_flags(registry: &FlagRegistry) -> FlagResult<()> {
    registry.register_all(&[&DEBUG_DUMP_OBJECTS])
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmprobe_flags::FlagError;

    #[test]
    fn test_register_flags() {
        let registry = FlagRegistry::new();
        register_flags(&registry).unwrap();

        assert_eq!(registry.names(), vec!["DebugDumpObjects"]);
        assert!(matches!(
            register_flags(&registry),
            Err(FlagError::DuplicateFlag(name)) if name == "DebugDumpObjects"
        ));
    }
}
