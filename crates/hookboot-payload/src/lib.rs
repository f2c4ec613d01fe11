//! Bootstrap library injected into target processes.
//!
//! The injector maps this library into the target, then starts a thread on
//! [`hookboot_bootstrap`] with the address of a remote parameter block,
//! encoded as a hexadecimal string. Everything from there on is the
//! orchestrated sequence in [`bootstrap`]: decode, connect back to the
//! host, load the user module, validate and run its entry point.

pub mod bootstrap;
pub mod entry;
pub mod params;
pub mod registry;
pub mod resolve;
pub mod session;

pub use bootstrap::{Bootstrap, OUTCOME_DUPLICATE, OUTCOME_FAILED, OUTCOME_OK};
pub use registry::{ChannelRegistry, process_registry};
pub use session::hooks::register_release;

#[cfg(windows)]
use std::ffi::c_void;

/// DLL entry point for Windows.
///
/// Nothing happens on attach; the injector starts the bootstrap explicitly
/// so it can pass the parameter block address.
#[cfg(windows)]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn DllMain(
    _hinst_dll: *mut c_void,
    _fdw_reason: u32,
    _lpv_reserved: *mut c_void,
) -> i32 {
    1 // TRUE
}

/// Bootstrap entry invoked by the injector.
///
/// `param` is a NUL-terminated hexadecimal string carrying the address of
/// the remote parameter block. Null means there is nothing to do. Returns
/// 0 (not applicable / pre-connection failure / completed), 1 (duplicate
/// channel) or -1 (failure after the host connection was established);
/// no panic and no error crosses this boundary.
#[cfg(windows)]
#[unsafe(no_mangle)]
pub extern "system" fn hookboot_bootstrap(param: *const std::ffi::c_char) -> i32 {
    let outcome = std::panic::catch_unwind(|| bootstrap_main(param));
    outcome.unwrap_or(OUTCOME_OK)
}

#[cfg(windows)]
fn bootstrap_main(param: *const std::ffi::c_char) -> i32 {
    if param.is_null() {
        return OUTCOME_OK;
    }

    init_tracing();

    let text = match unsafe { std::ffi::CStr::from_ptr(param) }.to_str() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "bootstrap parameter is not valid UTF-8");
            return OUTCOME_OK;
        }
    };

    let raw = params::parse_block_address(text)
        .and_then(|addr| unsafe { params::read_raw_params(addr) });
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(error = %e, "could not read remote parameter block");
            return OUTCOME_OK;
        }
    };

    Bootstrap::new(
        session::IpcConnector,
        resolve::WindowsModuleLoader,
        session::hooks::RegisteredHooks,
        process_registry(),
    )
    .run(raw)
}

/// Install a stderr subscriber for local diagnostics. The injected copy of
/// this library is usually the only tracing consumer in the target process.
#[cfg(windows)]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
}
