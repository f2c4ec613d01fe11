//! Bootstrap injection.
//!
//! Loads the payload library into the target with a remote `LoadLibraryA`
//! thread, places the serialized parameters and the remote parameter block
//! in target memory, then starts the bootstrap export with the block
//! address encoded as a hexadecimal string.

use std::ffi::{CString, c_void};
use std::path::{Path, PathBuf};

use hookboot_payload::params::RemoteEntryBlock;
use hookboot_shared::{Error, RemoteInfo, Result};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::LibraryLoader::{
    GetModuleHandleA, GetProcAddress, LoadLibraryW,
};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
};
use windows::Win32::System::ProcessStatus::{
    EnumProcessModulesEx, GetModuleFileNameExW, LIST_MODULES_ALL,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, OpenProcess, PROCESS_ALL_ACCESS, WaitForSingleObject,
};
use windows::core::{PCWSTR, s};

/// Inject the bootstrap into a target process and start it.
///
/// The control channel named by `info.channel_name` must already exist;
/// the bootstrap connects to it as its first action. Returns once the
/// bootstrap thread is started — completion arrives over the channel.
pub fn inject_bootstrap(pid: u32, info: &RemoteInfo) -> Result<()> {
    let payload_path = payload_library_path()?;
    tracing::debug!(path = %payload_path.display(), pid, "injecting bootstrap library");

    unsafe {
        let process = OpenProcess(PROCESS_ALL_ACCESS, false, pid)?;
        let result = inject_impl(process, &payload_path, info);
        let _ = CloseHandle(process);
        result
    }
}

/// The payload DLL ships next to the host executable.
fn payload_library_path() -> Result<PathBuf> {
    let exe_path = std::env::current_exe().map_err(|e| Error::Other(e.to_string()))?;
    let payload_path = exe_path
        .parent()
        .ok_or_else(|| Error::Other("Failed to get exe directory".into()))?
        .join("hookboot_payload.dll");

    if !payload_path.exists() {
        return Err(Error::Other(format!(
            "Payload DLL not found at: {}",
            payload_path.display()
        )));
    }
    Ok(payload_path)
}

unsafe fn inject_impl(process: HANDLE, payload_path: &Path, info: &RemoteInfo) -> Result<()> {
    let path_str = payload_path
        .to_str()
        .ok_or_else(|| Error::Other("Invalid payload path".into()))?;

    let remote_base = unsafe { load_remote_library(process, path_str, payload_path) }?;
    let entry = unsafe { remote_bootstrap_entry(payload_path, remote_base) }?;

    // Serialized parameters, then the block that points at them, then the
    // block's address as the textual bootstrap parameter. All of it stays
    // allocated: the target owns nothing, and the bootstrap copies what it
    // needs before doing anything else.
    let envelope = info.encode();
    let envelope_addr = unsafe { write_remote(process, &envelope) }?;

    let block = RemoteEntryBlock {
        host_pid: std::process::id(),
        payload_ptr: envelope_addr as *const u8,
        payload_len: envelope.len() as u32,
    };
    let block_bytes = unsafe {
        std::slice::from_raw_parts(
            &block as *const RemoteEntryBlock as *const u8,
            std::mem::size_of::<RemoteEntryBlock>(),
        )
    };
    let block_addr = unsafe { write_remote(process, block_bytes) }?;

    let param = format!("{:x}\0", block_addr as usize);
    let param_addr = unsafe { write_remote(process, param.as_bytes()) }?;

    // The bootstrap thread blocks for the lifetime of the user logic, so
    // it is started and left alone; outcome arrives over the channel.
    let thread = unsafe {
        CreateRemoteThread(
            process,
            None,
            0,
            Some(std::mem::transmute(entry)),
            Some(param_addr),
            0,
            None,
        )
    }?;
    unsafe {
        let _ = CloseHandle(thread);
    }

    tracing::info!("bootstrap thread started");
    Ok(())
}

/// Load the payload library in the target via `LoadLibraryA` and return its
/// remote base address.
unsafe fn load_remote_library(
    process: HANDLE,
    dll_path: &str,
    payload_path: &Path,
) -> Result<usize> {
    unsafe {
        let dll_path_cstr =
            CString::new(dll_path).map_err(|e| Error::Other(format!("Invalid path: {}", e)))?;
        let dll_path_bytes = dll_path_cstr.as_bytes_with_nul();

        let remote_mem = VirtualAllocEx(
            process,
            Some(std::ptr::null()),
            dll_path_bytes.len(),
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if remote_mem.is_null() {
            return Err(Error::Other(
                "Failed to allocate memory in target process".into(),
            ));
        }

        let write_result = WriteProcessMemory(
            process,
            remote_mem,
            dll_path_bytes.as_ptr() as *const _,
            dll_path_bytes.len(),
            None,
        );
        if write_result.is_err() {
            VirtualFreeEx(process, remote_mem, 0, MEM_RELEASE)?;
            return Err(Error::Other(
                "Failed to write to target process memory".into(),
            ));
        }

        let kernel32 = GetModuleHandleA(s!("kernel32.dll"))?;
        let load_library = GetProcAddress(kernel32, s!("LoadLibraryA"))
            .ok_or_else(|| Error::Other("Failed to get LoadLibraryA address".into()))?;

        let thread = CreateRemoteThread(
            process,
            None,
            0,
            Some(std::mem::transmute(load_library)),
            Some(remote_mem),
            0,
            None,
        )?;

        WaitForSingleObject(thread, 10000);

        let _ = CloseHandle(thread);
        let _ = VirtualFreeEx(process, remote_mem, 0, MEM_RELEASE);

        // The thread exit code truncates the base on 64-bit, so walk the
        // module list instead.
        find_remote_module(process, payload_path)
    }
}

/// Find the base address of the payload module inside the target.
unsafe fn find_remote_module(process: HANDLE, payload_path: &Path) -> Result<usize> {
    let wanted = payload_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other("Invalid payload file name".into()))?
        .to_lowercase();

    unsafe {
        let mut modules = [HMODULE::default(); 1024];
        let mut needed = 0u32;
        EnumProcessModulesEx(
            process,
            modules.as_mut_ptr(),
            (modules.len() * std::mem::size_of::<HMODULE>()) as u32,
            &mut needed,
            LIST_MODULES_ALL,
        )?;

        let count = (needed as usize / std::mem::size_of::<HMODULE>()).min(modules.len());
        for &module in &modules[..count] {
            let mut name_buf = [0u16; 1024];
            let len = GetModuleFileNameExW(process, Some(module), &mut name_buf);
            if len == 0 {
                continue;
            }
            let name = String::from_utf16_lossy(&name_buf[..len as usize]);
            let base_name = name.rsplit(['\\', '/']).next().unwrap_or(&name);
            if base_name.to_lowercase() == wanted {
                return Ok(module.0 as usize);
            }
        }
    }

    Err(Error::Other(format!(
        "Module '{wanted}' not present in target after injection"
    )))
}

/// Compute the remote address of the bootstrap export by rebasing the
/// symbol offset observed in our own mapping of the payload library.
unsafe fn remote_bootstrap_entry(payload_path: &Path, remote_base: usize) -> Result<usize> {
    let wide: Vec<u16> = payload_path
        .as_os_str()
        .to_string_lossy()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    unsafe {
        let local = LoadLibraryW(PCWSTR(wide.as_ptr()))?;
        let proc = GetProcAddress(local, s!("hookboot_bootstrap"))
            .ok_or_else(|| Error::Other("Payload DLL exports no hookboot_bootstrap".into()))?;

        let offset = proc as usize - local.0 as usize;
        Ok(remote_base + offset)
    }
}

/// Allocate memory in the target and copy `bytes` into it.
unsafe fn write_remote(process: HANDLE, bytes: &[u8]) -> Result<*mut c_void> {
    unsafe {
        let remote_mem = VirtualAllocEx(
            process,
            Some(std::ptr::null()),
            bytes.len(),
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if remote_mem.is_null() {
            return Err(Error::Other(
                "Failed to allocate memory in target process".into(),
            ));
        }

        WriteProcessMemory(
            process,
            remote_mem,
            bytes.as_ptr() as *const _,
            bytes.len(),
            None,
        )?;
        Ok(remote_mem)
    }
}
