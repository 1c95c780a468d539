//! Flag overrides from configuration
//!
//! Overrides are collected from a comma-separated list
//! (`"FastPath=true, Verbose"`), a TOML document with a `[flags]` table, or
//! the `VMPROBE_FLAGS` environment variable, and then applied to a registry.
//!
//! ```toml
//! [flags]
//! FastPath = true
//! DebugDumpObjects = false
//! ```

use crate::registry::FlagRegistry;
use crate::{FlagError, FlagResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env::VarError;
use std::path::Path;

/// Environment variable read by [`FlagOverrides::from_env`]
pub const FLAGS_ENV_VAR: &str = "VMPROBE_FLAGS";

/// Ordered list of `(name, value)` assignments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagOverrides {
    entries: Vec<(String, bool)>,
}

/// Outcome of [`FlagOverrides::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Names that were found and set
    pub applied: Vec<String>,
    /// Names with no registered flag
    pub unknown: Vec<String>,
}

impl ApplyReport {
    /// Whether every override matched a registered flag
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct OverridesFile {
    #[serde(default)]
    flags: BTreeMap<String, bool>,
}

impl FlagOverrides {
    /// Create an empty override set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assignment; later assignments to the same name win on apply
    pub fn push(&mut self, name: impl Into<String>, value: bool) {
        self.entries.push((name.into(), value));
    }

    /// Parse list syntax: `Name=value` pairs separated by commas
    ///
    /// A bare name means `true`. Values are `true/false/1/0/on/off`, case
    /// insensitive. Empty entries are skipped.
    pub fn parse_list(input: &str) -> FlagResult<Self> {
        let mut overrides = Self::new();

        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, value) = match entry.split_once('=') {
                Some((name, value)) => (name.trim(), parse_bool(entry, value.trim())?),
                None => (entry, true),
            };

            if name.is_empty() {
                return Err(FlagError::InvalidOverride {
                    entry: entry.to_string(),
                    reason: "missing flag name".to_string(),
                });
            }

            overrides.push(name, value);
        }

        Ok(overrides)
    }

    /// Parse a TOML document with a `[flags]` table of booleans
    pub fn from_toml_str(input: &str) -> FlagResult<Self> {
        let file: OverridesFile = toml::from_str(input)?;
        Ok(Self {
            entries: file.flags.into_iter().collect(),
        })
    }

    /// Read and parse a TOML overrides file
    pub fn from_toml_file(path: impl AsRef<Path>) -> FlagResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse [`FLAGS_ENV_VAR`] in list syntax; unset means no overrides
    pub fn from_env() -> FlagResult<Self> {
        Self::from_env_var(FLAGS_ENV_VAR)
    }

    /// Parse an arbitrary environment variable in list syntax
    pub fn from_env_var(var: &str) -> FlagResult<Self> {
        match std::env::var(var) {
            Ok(value) => Self::parse_list(&value),
            Err(VarError::NotPresent) => Ok(Self::new()),
            Err(VarError::NotUnicode(_)) => Err(FlagError::InvalidOverride {
                entry: var.to_string(),
                reason: "value is not valid unicode".to_string(),
            }),
        }
    }

    /// Append every assignment of `other`
    pub fn extend(&mut self, other: FlagOverrides) {
        self.entries.extend(other.entries);
    }

    /// Assignments in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Number of assignments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no assignments
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every assignment through [`FlagRegistry::set_by_name`]
    ///
    /// Unknown names are logged and reported, never fatal.
    pub fn apply(&self, registry: &FlagRegistry) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (name, value) in self.iter() {
            if registry.set_by_name(name, value) {
                report.applied.push(name.to_string());
            } else {
                tracing::warn!(flag = name, "override for unknown flag ignored");
                report.unknown.push(name.to_string());
            }
        }

        report
    }
}

fn parse_bool(entry: &str, value: &str) -> FlagResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(FlagError::InvalidOverride {
            entry: entry.to_string(),
            reason: format!("expected a boolean, got '{}'", value),
        }),
    }
}
