//! Entry-point contract for user modules.
//!
//! A user module makes itself eligible for injection by exporting a static
//! entry table under [`ENTRY_TABLE_SYMBOL`] (use [`export_entry_table!`]).
//! The table must hold exactly one [`EntryDescriptor`]: the descriptor
//! declares the parameter shape the entry point expects and a factory that
//! constructs it. Construction and [`EntryPoint::run`] receive the same
//! `(context, arguments)` list; `run` blocks for the lifetime of the
//! injected logic.

use std::fmt;

use crate::wire::PluginValue;

/// Plugin API version spoken by this build. Checked against the loaded
/// module's entry table before anything in it is trusted.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Exported symbol resolved in the loaded user module.
pub const ENTRY_TABLE_SYMBOL: &str = "hookboot_entry_table";

/// Signature of the exported entry table accessor.
pub type EntryTableFn = extern "C" fn() -> &'static EntryTable;

/// Error type surfaced by user entry points.
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// Kinds an entry point parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    I32,
    I64,
    U64,
    F64,
    Str,
    Bytes,
}

impl ParamKind {
    /// Name used in mismatch diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::I32 => "i32",
            ParamKind::I64 => "i64",
            ParamKind::U64 => "u64",
            ParamKind::F64 => "f64",
            ParamKind::Str => "str",
            ParamKind::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared shape of one entry point parameter.
///
/// `optional` parameters accept a null argument; everything else requires a
/// value of the exact declared kind. No widening is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamShape {
    pub kind: ParamKind,
    pub optional: bool,
}

impl ParamShape {
    pub const fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            optional: false,
        }
    }

    pub const fn optional(kind: ParamKind) -> Self {
        Self {
            kind,
            optional: true,
        }
    }

    /// Whether a decoded argument satisfies this shape.
    pub fn accepts(&self, value: &PluginValue) -> bool {
        match value {
            PluginValue::Null => self.optional,
            PluginValue::Bool(_) => self.kind == ParamKind::Bool,
            PluginValue::I32(_) => self.kind == ParamKind::I32,
            PluginValue::I64(_) => self.kind == ParamKind::I64,
            PluginValue::U64(_) => self.kind == ParamKind::U64,
            PluginValue::F64(_) => self.kind == ParamKind::F64,
            PluginValue::Str(_) => self.kind == ParamKind::Str,
            PluginValue::Bytes(_) => self.kind == ParamKind::Bytes,
        }
    }
}

/// Context record passed as the implicit first parameter to construction
/// and run. Exposes the host that performed the injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteContext {
    /// PID of the injecting host process
    pub host_pid: u32,
}

/// The capability a user type implements to be eligible as an entry point.
pub trait EntryPoint: Send {
    /// Entry method. Called once, after the host has been notified of a
    /// completed injection; expected to block until the injected logic is
    /// done. Error reporting from inside is the entry point's own business.
    fn run(&mut self, ctx: &RemoteContext, args: &[PluginValue]) -> Result<(), PluginError>;
}

/// Factory constructing one entry point instance. Receives the same
/// argument list later passed to [`EntryPoint::run`].
pub type EntryFactory =
    fn(&RemoteContext, &[PluginValue]) -> Result<Box<dyn EntryPoint>, PluginError>;

/// One exported entry point and its invocation contract.
pub struct EntryDescriptor {
    /// Display name, used in diagnostics only
    pub name: &'static str,
    /// Declared user parameter shapes (the context record is implicit)
    pub params: &'static [ParamShape],
    /// Constructor
    pub construct: EntryFactory,
}

impl fmt::Debug for EntryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// The table a user module exports under [`ENTRY_TABLE_SYMBOL`].
#[derive(Debug)]
pub struct EntryTable {
    /// Must equal [`PLUGIN_API_VERSION`]
    pub api_version: u32,
    /// Must hold exactly one descriptor
    pub entries: &'static [EntryDescriptor],
}

/// Export an entry table from a user module.
///
/// ```ignore
/// use hookboot_shared::plugin::{EntryDescriptor, ParamKind, ParamShape};
///
/// hookboot_shared::export_entry_table!(EntryDescriptor {
///     name: "demo",
///     params: &[
///         ParamShape::required(ParamKind::I32),
///         ParamShape::required(ParamKind::Str),
///     ],
///     construct: |_ctx, _args| Ok(Box::new(Demo)),
/// });
/// ```
#[macro_export]
macro_rules! export_entry_table {
    ($($entry:expr),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn hookboot_entry_table() -> &'static $crate::plugin::EntryTable {
            static TABLE: $crate::plugin::EntryTable = $crate::plugin::EntryTable {
                api_version: $crate::plugin::PLUGIN_API_VERSION,
                entries: &[$($entry),+],
            };
            &TABLE
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_accepts_exact_kind() {
        let shape = ParamShape::required(ParamKind::I32);
        assert!(shape.accepts(&PluginValue::I32(1)));
        assert!(!shape.accepts(&PluginValue::I64(1)));
        assert!(!shape.accepts(&PluginValue::Str("1".into())));
    }

    #[test]
    fn test_null_only_for_optional() {
        assert!(!ParamShape::required(ParamKind::Str).accepts(&PluginValue::Null));
        assert!(ParamShape::optional(ParamKind::Str).accepts(&PluginValue::Null));
        // optional still type-checks non-null values
        assert!(!ParamShape::optional(ParamKind::Str).accepts(&PluginValue::Bool(true)));
    }

    #[test]
    fn test_no_widening() {
        // an i32 value does not satisfy a declared i64 and vice versa
        assert!(!ParamShape::required(ParamKind::I64).accepts(&PluginValue::I32(5)));
        assert!(!ParamShape::required(ParamKind::I32).accepts(&PluginValue::I64(5)));
    }
}
