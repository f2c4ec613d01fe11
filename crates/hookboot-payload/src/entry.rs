//! Entry-point location, contract validation and invocation.
//!
//! The loaded module's entry table must hold exactly one descriptor. Its
//! declared parameter shape is checked against the decoded arguments before
//! anything is constructed; construction and run receive the identical
//! `(context, arguments)` list. Both calls dispatch into untrusted user
//! code, so panics are caught at this boundary and folded into the error
//! taxonomy.

use std::panic::{AssertUnwindSafe, catch_unwind};

use hookboot_shared::plugin::{
    EntryDescriptor, EntryPoint, EntryTable, PLUGIN_API_VERSION, RemoteContext,
};
use hookboot_shared::{Error, PluginValue, Result};

/// Pick the single entry descriptor out of a loaded table.
///
/// Zero descriptors is "entry point not found"; several are rejected rather
/// than resolved by scan order.
pub fn select_entry(table: &'static EntryTable) -> Result<&'static EntryDescriptor> {
    if table.api_version != PLUGIN_API_VERSION {
        return Err(Error::ApiVersionMismatch {
            module: table.api_version,
            host: PLUGIN_API_VERSION,
        });
    }

    match table.entries {
        [] => Err(Error::EntryPointNotFound),
        [entry] => Ok(entry),
        entries => Err(Error::AmbiguousEntryPoint(entries.len())),
    }
}

/// Decode the user argument blobs, each independently.
///
/// Runs only after the user module is loaded; a bad blob names its position.
pub fn decode_arguments(blobs: &[Vec<u8>]) -> Result<Vec<PluginValue>> {
    blobs
        .iter()
        .enumerate()
        .map(|(index, blob)| {
            PluginValue::decode(blob).map_err(|source| Error::ArgumentDecode { index, source })
        })
        .collect()
}

/// Validate the decoded arguments against the descriptor's declared shape.
///
/// Count first, then kind by position. Null is accepted only where the
/// shape says so; there is no widening.
pub fn validate_signature(entry: &EntryDescriptor, args: &[PluginValue]) -> Result<()> {
    if entry.params.len() != args.len() {
        return Err(Error::ParameterCountMismatch {
            declared: entry.params.len(),
            supplied: args.len(),
        });
    }

    for (index, (shape, value)) in entry.params.iter().zip(args).enumerate() {
        if !shape.accepts(value) {
            return Err(Error::ParameterTypeMismatch {
                index,
                declared: shape.kind.name(),
                supplied: value.kind_name(),
            });
        }
    }

    Ok(())
}

/// Construct one instance of the entry point.
pub fn construct(
    entry: &EntryDescriptor,
    ctx: &RemoteContext,
    args: &[PluginValue],
) -> Result<Box<dyn EntryPoint>> {
    let outcome = catch_unwind(AssertUnwindSafe(|| (entry.construct)(ctx, args)));
    match outcome {
        Ok(Ok(instance)) => Ok(instance),
        Ok(Err(e)) => Err(Error::Construct(e.to_string())),
        Err(panic) => Err(Error::Construct(format!(
            "constructor panicked: {}",
            panic_message(&panic)
        ))),
    }
}

/// Invoke the entry method. Blocks until the injected logic returns.
pub fn invoke_run(
    instance: &mut Box<dyn EntryPoint>,
    ctx: &RemoteContext,
    args: &[PluginValue],
) -> Result<()> {
    let outcome = catch_unwind(AssertUnwindSafe(|| instance.run(ctx, args)));
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Run(e.to_string())),
        Err(panic) => Err(Error::Run(format!(
            "run panicked: {}",
            panic_message(&panic)
        ))),
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use hookboot_shared::plugin::{ParamKind, ParamShape, PluginError};

    use super::*;

    struct Quiet;

    impl EntryPoint for Quiet {
        fn run(&mut self, _ctx: &RemoteContext, _args: &[PluginValue]) -> std::result::Result<(), PluginError> {
            Ok(())
        }
    }

    fn quiet_factory(
        _ctx: &RemoteContext,
        _args: &[PluginValue],
    ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
        Ok(Box::new(Quiet))
    }

    const DEMO_PARAMS: &[ParamShape] = &[
        ParamShape::required(ParamKind::I32),
        ParamShape::optional(ParamKind::Str),
    ];

    const DEMO_ENTRY: EntryDescriptor = EntryDescriptor {
        name: "demo",
        params: DEMO_PARAMS,
        construct: quiet_factory,
    };

    #[test]
    fn test_select_entry_exactly_one() {
        static TABLE: EntryTable = EntryTable {
            api_version: PLUGIN_API_VERSION,
            entries: &[DEMO_ENTRY],
        };
        assert_eq!(select_entry(&TABLE).unwrap().name, "demo");
    }

    #[test]
    fn test_select_entry_zero_is_not_found() {
        static TABLE: EntryTable = EntryTable {
            api_version: PLUGIN_API_VERSION,
            entries: &[],
        };
        assert!(matches!(
            select_entry(&TABLE),
            Err(Error::EntryPointNotFound)
        ));
    }

    #[test]
    fn test_select_entry_many_is_ambiguous() {
        static TABLE: EntryTable = EntryTable {
            api_version: PLUGIN_API_VERSION,
            entries: &[DEMO_ENTRY, DEMO_ENTRY],
        };
        assert!(matches!(
            select_entry(&TABLE),
            Err(Error::AmbiguousEntryPoint(2))
        ));
    }

    #[test]
    fn test_select_entry_rejects_wrong_api_version() {
        static TABLE: EntryTable = EntryTable {
            api_version: PLUGIN_API_VERSION + 1,
            entries: &[DEMO_ENTRY],
        };
        assert!(matches!(
            select_entry(&TABLE),
            Err(Error::ApiVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_arguments_names_bad_index() {
        let blobs = vec![PluginValue::I32(1).encode(), vec![0xAB]];
        match decode_arguments(&blobs) {
            Err(Error::ArgumentDecode { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_signature_count_mismatch() {
        let args = vec![PluginValue::I32(1)];
        match validate_signature(&DEMO_ENTRY, &args) {
            Err(Error::ParameterCountMismatch { declared, supplied }) => {
                assert_eq!(declared, 2);
                assert_eq!(supplied, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_signature_kind_mismatch_names_position() {
        let args = vec![PluginValue::Str("no".into()), PluginValue::Str("x".into())];
        match validate_signature(&DEMO_ENTRY, &args) {
            Err(Error::ParameterTypeMismatch {
                index,
                declared,
                supplied,
            }) => {
                assert_eq!(index, 0);
                assert_eq!(declared, "i32");
                assert_eq!(supplied, "str");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_validate_signature_null_rules() {
        // null satisfies the optional str, not the required i32
        let good = vec![PluginValue::I32(7), PluginValue::Null];
        assert!(validate_signature(&DEMO_ENTRY, &good).is_ok());

        let bad = vec![PluginValue::Null, PluginValue::Null];
        assert!(matches!(
            validate_signature(&DEMO_ENTRY, &bad),
            Err(Error::ParameterTypeMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_construct_folds_factory_error() {
        fn refusing(
            _ctx: &RemoteContext,
            _args: &[PluginValue],
        ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
            Err("refused".into())
        }
        let entry = EntryDescriptor {
            name: "refusing",
            params: &[],
            construct: refusing,
        };
        let ctx = RemoteContext { host_pid: 1 };
        match construct(&entry, &ctx, &[]) {
            Err(Error::Construct(msg)) => assert!(msg.contains("refused")),
            Ok(_) => panic!("unexpected ok"),
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_construct_catches_panic() {
        fn panicking(
            _ctx: &RemoteContext,
            _args: &[PluginValue],
        ) -> std::result::Result<Box<dyn EntryPoint>, PluginError> {
            panic!("factory exploded");
        }
        let entry = EntryDescriptor {
            name: "panicking",
            params: &[],
            construct: panicking,
        };
        let ctx = RemoteContext { host_pid: 1 };
        match construct(&entry, &ctx, &[]) {
            Err(Error::Construct(msg)) => assert!(msg.contains("factory exploded")),
            Ok(_) => panic!("unexpected ok"),
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invoke_run_catches_panic() {
        struct Explosive;
        impl EntryPoint for Explosive {
            fn run(
                &mut self,
                _ctx: &RemoteContext,
                _args: &[PluginValue],
            ) -> std::result::Result<(), PluginError> {
                panic!("run exploded");
            }
        }

        let ctx = RemoteContext { host_pid: 1 };
        let mut instance: Box<dyn EntryPoint> = Box::new(Explosive);
        match invoke_run(&mut instance, &ctx, &[]) {
            Err(Error::Run(msg)) => assert!(msg.contains("run exploded")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
