//! Remote parameter block reader.
//!
//! The native loader hands the bootstrap a single textual parameter: the
//! address of a [`RemoteEntryBlock`] in this process, encoded as a
//! hexadecimal string. The referenced payload memory belongs to the
//! injecting side and carries no lifetime guarantee past the initial call,
//! so everything is copied out before any other component runs.

use hookboot_shared::{Error, Result};

/// Fixed-layout record placed in the target process by the injector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RemoteEntryBlock {
    /// PID of the process that performed the injection
    pub host_pid: u32,
    /// Location of the serialized payload
    pub payload_ptr: *const u8,
    /// Size of the serialized payload in bytes
    pub payload_len: u32,
}

/// Owned copy of everything the bootstrap needs from the raw block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParams {
    pub host_pid: u32,
    pub payload: Vec<u8>,
}

/// Parse the hexadecimal block address passed across the loader boundary.
/// A leading `0x` is tolerated.
pub fn parse_block_address(param: &str) -> Result<usize> {
    let trimmed = param.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let addr = usize::from_str_radix(digits, 16)
        .map_err(|e| Error::MalformedParams(format!("bad block address '{trimmed}': {e}")))?;
    if addr == 0 {
        return Err(Error::MalformedParams("null block address".into()));
    }
    Ok(addr)
}

/// Read the block at `addr` and copy the payload it references.
///
/// # Safety
///
/// `addr` must point at a live, readable [`RemoteEntryBlock`] whose payload
/// pointer and length describe readable memory in this process. The platform
/// memory-read primitive is the only validation there is.
pub unsafe fn read_raw_params(addr: usize) -> Result<RawParams> {
    let block = unsafe { std::ptr::read_unaligned(addr as *const RemoteEntryBlock) };

    if block.payload_ptr.is_null() {
        return Err(Error::MalformedParams("null payload pointer".into()));
    }
    if block.payload_len == 0 {
        return Err(Error::MalformedParams("empty payload".into()));
    }

    let payload =
        unsafe { std::slice::from_raw_parts(block.payload_ptr, block.payload_len as usize) }
            .to_vec();

    Ok(RawParams {
        host_pid: block.host_pid,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_address() {
        assert_eq!(parse_block_address("1f00").unwrap(), 0x1F00);
        assert_eq!(parse_block_address("0x1F00").unwrap(), 0x1F00);
        assert_eq!(parse_block_address("  0X2a  ").unwrap(), 0x2A);
    }

    #[test]
    fn test_parse_block_address_rejects_garbage() {
        assert!(parse_block_address("").is_err());
        assert!(parse_block_address("zz").is_err());
        assert!(parse_block_address("0").is_err());
        assert!(parse_block_address("0x").is_err());
    }

    #[test]
    fn test_read_raw_params_from_local_block() {
        let payload = vec![9u8, 8, 7, 6, 5];
        let block = RemoteEntryBlock {
            host_pid: 4242,
            payload_ptr: payload.as_ptr(),
            payload_len: payload.len() as u32,
        };

        let addr = &block as *const RemoteEntryBlock as usize;
        let raw = unsafe { read_raw_params(addr) }.unwrap();
        assert_eq!(raw.host_pid, 4242);
        assert_eq!(raw.payload, payload);
    }

    #[test]
    fn test_read_raw_params_rejects_null_payload() {
        let block = RemoteEntryBlock {
            host_pid: 1,
            payload_ptr: std::ptr::null(),
            payload_len: 16,
        };
        let addr = &block as *const RemoteEntryBlock as usize;
        assert!(unsafe { read_raw_params(addr) }.is_err());
    }

    #[test]
    fn test_read_raw_params_rejects_empty_payload() {
        let data = [1u8];
        let block = RemoteEntryBlock {
            host_pid: 1,
            payload_ptr: data.as_ptr(),
            payload_len: 0,
        };
        let addr = &block as *const RemoteEntryBlock as usize;
        assert!(unsafe { read_raw_params(addr) }.is_err());
    }
}
