//! User module resolver.
//!
//! Loads the user-supplied module by logical identity first, falling back to
//! its file location. An identity load resolves against the system library
//! search path and wins when the module is deployed to a shared location; a
//! path load is what makes private, unregistered deployments work. Neither
//! subsumes the other, so each failure is only a warning and the conjunction
//! is what aborts the bootstrap.

use hookboot_shared::plugin::EntryTable;
use hookboot_shared::{Error, Result, RemoteInfo};

use crate::session::HostLink;

/// A loaded user module that can surface its entry table.
pub trait EntryModule {
    fn entry_table(&self) -> Result<&'static EntryTable>;
}

/// Loads user modules. Split from the orchestrator so the load strategy is
/// observable in tests.
pub trait ModuleLoader {
    type Module: EntryModule;

    /// Load by logical name through the library search path.
    fn load_by_identity(&self, identity: &str) -> Result<Self::Module>;

    /// Load from a file location.
    fn load_by_path(&self, path: &str) -> Result<Self::Module>;
}

/// Resolve the user module named by the decoded parameters.
///
/// Both attempts are logged, locally and to the host; only both failing is
/// fatal. Which strategy succeeded is invisible to downstream stages.
pub fn resolve_module<L, H>(loader: &L, info: &RemoteInfo, link: &mut H) -> Result<L::Module>
where
    L: ModuleLoader,
    H: HostLink,
{
    if !info.module_identity.is_empty() {
        match loader.load_by_identity(&info.module_identity) {
            Ok(module) => {
                tracing::debug!(identity = %info.module_identity, "loaded module by identity");
                link.comment(&format!("SUCCESS: load({})", info.module_identity));
                return Ok(module);
            }
            Err(e) => {
                tracing::warn!(identity = %info.module_identity, error = %e, "identity load failed");
                link.warn(&format!("FAIL: load({}) - {}", info.module_identity, e));
            }
        }
    }

    match loader.load_by_path(&info.module_path) {
        Ok(module) => {
            tracing::debug!(path = %info.module_path, "loaded module by path");
            link.comment(&format!("SUCCESS: load_from({})", info.module_path));
            Ok(module)
        }
        Err(e) => {
            tracing::warn!(path = %info.module_path, error = %e, "path load failed");
            link.warn(&format!("FAIL: load_from({}) - {}", info.module_path, e));
            Err(Error::ModuleLoad {
                path: info.module_path.clone(),
                identity: info.module_identity.clone(),
            })
        }
    }
}

#[cfg(windows)]
pub use windows_impl::WindowsModuleLoader;

#[cfg(windows)]
mod windows_impl {
    use hookboot_shared::plugin::{EntryTable, EntryTableFn, ENTRY_TABLE_SYMBOL};
    use hookboot_shared::{Error, Result};
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
    use windows::core::{PCSTR, PCWSTR};

    use super::{EntryModule, ModuleLoader};

    /// Production loader backed by the Windows loader.
    pub struct WindowsModuleLoader;

    /// A module mapped into this process.
    ///
    /// The handle is deliberately never freed: once the entry point runs,
    /// hook thunks inside the module may be live for the rest of the
    /// process.
    pub struct WindowsModule {
        handle: HMODULE,
    }

    fn load(name: &str) -> Result<WindowsModule> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe { LoadLibraryW(PCWSTR(wide.as_ptr())) }?;
        Ok(WindowsModule { handle })
    }

    impl ModuleLoader for WindowsModuleLoader {
        type Module = WindowsModule;

        fn load_by_identity(&self, identity: &str) -> Result<Self::Module> {
            load(identity)
        }

        fn load_by_path(&self, path: &str) -> Result<Self::Module> {
            load(path)
        }
    }

    impl EntryModule for WindowsModule {
        fn entry_table(&self) -> Result<&'static EntryTable> {
            let symbol = concat!("hookboot_entry_table", "\0");
            debug_assert_eq!(&symbol[..symbol.len() - 1], ENTRY_TABLE_SYMBOL);

            let proc = unsafe { GetProcAddress(self.handle, PCSTR(symbol.as_ptr())) }
                .ok_or(Error::EntryPointNotFound)?;

            // Same-toolchain plugin contract: the exported accessor returns
            // a static table reference.
            let accessor: EntryTableFn = unsafe { std::mem::transmute(proc) };
            Ok(accessor())
        }
    }
}
