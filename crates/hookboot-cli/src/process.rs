//! Target process lookup.

use hookboot_shared::{Error, Result};
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::System::ProcessStatus::{EnumProcesses, GetModuleBaseNameW};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

/// Resolve target PID from either --pid or --name
pub fn resolve_target(pid: Option<u32>, name: Option<String>) -> Result<u32> {
    match (pid, name) {
        (Some(p), _) => Ok(p),
        (None, Some(n)) => find_process_by_name(&n),
        (None, None) => Err(Error::Other("Must specify either --pid or --name".into())),
    }
}

/// List (pid, name) for every process we can open.
pub fn list_processes() -> Result<Vec<(u32, String)>> {
    let mut result = Vec::new();
    for_each_process(|pid, name| {
        result.push((pid, name.to_owned()));
        false
    })?;
    Ok(result)
}

/// Find a process by name, returns the PID
pub fn find_process_by_name(name: &str) -> Result<u32> {
    let search_name = name.to_lowercase();
    let search_name_exe = if search_name.ends_with(".exe") {
        search_name.clone()
    } else {
        format!("{}.exe", search_name)
    };

    let mut found = None;
    for_each_process(|pid, proc_name| {
        let lower = proc_name.to_lowercase();
        if lower == search_name || lower == search_name_exe {
            found = Some(pid);
            true
        } else {
            false
        }
    })?;

    found.ok_or_else(|| Error::Other(format!("Process '{}' not found", name)))
}

/// Walk every enumerable process, stopping early when the callback asks to.
fn for_each_process(mut visit: impl FnMut(u32, &str) -> bool) -> Result<()> {
    unsafe {
        let mut pids = [0u32; 4096];
        let mut bytes_returned: u32 = 0;

        EnumProcesses(
            pids.as_mut_ptr(),
            (pids.len() * std::mem::size_of::<u32>()) as u32,
            &mut bytes_returned,
        )?;

        let count = bytes_returned as usize / std::mem::size_of::<u32>();

        for &pid in &pids[..count] {
            if pid == 0 {
                continue;
            }

            if let Ok(process) =
                OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid)
            {
                let mut name_buf = [0u16; 260];
                let len = GetModuleBaseNameW(process, None, &mut name_buf);
                let _ = CloseHandle(process);

                if len > 0 {
                    let proc_name = String::from_utf16_lossy(&name_buf[..len as usize]);
                    if visit(pid, &proc_name) {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}
