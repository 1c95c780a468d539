//! Value kinds as seen through the bridge

use serde::Serialize;
use std::fmt;

/// Kind of a VM value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Absence of a value
    Nil,
    /// `true` or `false`
    Boolean,
    /// Host pointer stored inline, not owned by the VM
    LightUserdata,
    /// Double-precision number
    Number,
    /// Inline float vector
    Vector,
    /// Immutable byte string
    String,
    /// Associative array; may carry a descriptor
    Table,
    /// Closure or host function
    Function,
    /// Opaque host data block; may carry a descriptor
    Userdata,
    /// Fixed-size mutable byte buffer
    Buffer,
}

impl ValueKind {
    /// Whether values of this kind can have a descriptor attached
    #[inline]
    pub fn carries_descriptor(self) -> bool {
        matches!(self, ValueKind::Table | ValueKind::Userdata)
    }

    /// Whether values of this kind live on the VM heap
    #[inline]
    pub fn is_collectable(self) -> bool {
        matches!(
            self,
            ValueKind::String
                | ValueKind::Table
                | ValueKind::Function
                | ValueKind::Userdata
                | ValueKind::Buffer
        )
    }

    /// Script-visible type name
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::LightUserdata | ValueKind::Userdata => "userdata",
            ValueKind::Number => "number",
            ValueKind::Vector => "vector",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Buffer => "buffer",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_tables_and_userdata_carry_descriptors() {
        let carriers: Vec<_> = [
            ValueKind::Nil,
            ValueKind::Boolean,
            ValueKind::LightUserdata,
            ValueKind::Number,
            ValueKind::Vector,
            ValueKind::String,
            ValueKind::Table,
            ValueKind::Function,
            ValueKind::Userdata,
            ValueKind::Buffer,
        ]
        .into_iter()
        .filter(|kind| kind.carries_descriptor())
        .collect();

        assert_eq!(carriers, vec![ValueKind::Table, ValueKind::Userdata]);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ValueKind::LightUserdata.name(), "userdata");
        assert_eq!(ValueKind::Table.to_string(), "table");
        assert!(!ValueKind::Number.is_collectable());
        assert!(ValueKind::String.is_collectable());
    }
}
