//! Shared memory control channel
//!
//! Uses a byte-based ring buffer with packet protocol:
//! - Header carries the magic, the host PID, ring buffer indices and the
//!   ping/pong sequence counters used for the liveness check
//! - Data region is a circular buffer for variable-size packets
//!
//! The host creates the mapping before injecting; the bootstrap opens it by
//! channel name from inside the target process.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_TIMEOUT};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, FILE_MAP_READ, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, PAGE_READWRITE, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{OpenProcess, PROCESS_SYNCHRONIZE, WaitForSingleObject};
use windows::core::{Error as Win32Error, PCWSTR, Result as Win32Result};

use crate::error::{Error, Result};
use crate::messages::{FailureReport, HEADER_SIZE, LogLevel, MAX_PAYLOAD_SIZE, Packet, PacketHeader};
use crate::{CONTROL_CHANNEL_PREFIX, CONTROL_CHANNEL_SIZE, MAGIC};

/// Size of the shared header (24 bytes core + reserved padding = 256)
pub const CONTROL_HEADER_SIZE: usize = 256;

/// Size of the ring buffer data region
pub const RING_BUFFER_SIZE: usize = CONTROL_CHANNEL_SIZE - CONTROL_HEADER_SIZE;

/// Interval between polls while waiting on the channel
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Header at the start of shared memory
#[repr(C)]
pub struct ControlHeader {
    /// Magic value to verify valid shared memory
    pub magic: u32,
    /// Process ID of the host that created the channel
    pub host_pid: u32,
    /// Write offset in ring buffer (bootstrap writes here)
    pub write_offset: AtomicU32,
    /// Read offset in ring buffer (host reads from here)
    pub read_offset: AtomicU32,
    /// Liveness sequence published by the bootstrap
    pub ping_seq: AtomicU32,
    /// Liveness echo written by the host
    pub pong_seq: AtomicU32,
    /// Reserved for future use / padding
    pub reserved: [u8; 232],
}

fn mapping_name(channel: &str) -> Vec<u16> {
    format!("{}{}\0", CONTROL_CHANNEL_PREFIX, channel)
        .encode_utf16()
        .collect()
}

/// Handle to the control channel (host side - creates the mapping)
pub struct ControlHost {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
}

impl ControlHost {
    /// Create the control channel for an injection session
    pub fn create(channel: &str, host_pid: u32) -> Win32Result<Self> {
        let name_wide = mapping_name(channel);

        unsafe {
            let handle = CreateFileMappingW(
                HANDLE::default(),
                None,
                PAGE_READWRITE,
                0,
                CONTROL_CHANNEL_SIZE as u32,
                PCWSTR(name_wide.as_ptr()),
            )?;

            let view = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, CONTROL_CHANNEL_SIZE);
            if view.Value.is_null() {
                CloseHandle(handle)?;
                return Err(Win32Error::from_win32());
            }

            // Initialize header
            let header = &mut *(view.Value as *mut ControlHeader);
            header.magic = MAGIC;
            header.host_pid = host_pid;
            header.write_offset = AtomicU32::new(0);
            header.read_offset = AtomicU32::new(0);
            header.ping_seq = AtomicU32::new(0);
            header.pong_seq = AtomicU32::new(0);
            header.reserved = [0u8; 232];

            Ok(Self { handle, view })
        }
    }

    fn header(&self) -> &ControlHeader {
        unsafe { &*(self.view.Value as *const ControlHeader) }
    }

    fn ring_buffer(&self) -> &[u8] {
        unsafe {
            let ptr = (self.view.Value as *const u8).add(CONTROL_HEADER_SIZE);
            std::slice::from_raw_parts(ptr, RING_BUFFER_SIZE)
        }
    }

    /// Answer an outstanding liveness ping, then try to read one packet.
    pub fn pump(&mut self) -> Option<Packet> {
        let header = self.header();
        let ping = header.ping_seq.load(Ordering::Acquire);
        if header.pong_seq.load(Ordering::Acquire) != ping {
            header.pong_seq.store(ping, Ordering::Release);
        }
        self.try_read()
    }

    /// Try to read a packet (non-blocking)
    pub fn try_read(&mut self) -> Option<Packet> {
        let header = self.header();
        let read_off = header.read_offset.load(Ordering::Acquire);
        let write_off = header.write_offset.load(Ordering::Acquire);

        if read_off == write_off {
            return None; // No data
        }

        let ring = self.ring_buffer();

        // Read packet header (may wrap around)
        let mut hdr_bytes = [0u8; HEADER_SIZE];
        for (i, byte) in hdr_bytes.iter_mut().enumerate() {
            *byte = ring[(read_off as usize + i) % RING_BUFFER_SIZE];
        }

        let pkt_header = PacketHeader::from_bytes(&hdr_bytes)?;
        if !pkt_header.is_valid() {
            return None;
        }

        let payload_size = pkt_header.size as usize;
        if payload_size > MAX_PAYLOAD_SIZE {
            return None;
        }

        // Read payload (may wrap around)
        let mut payload = vec![0u8; payload_size];
        let payload_start = (read_off as usize + HEADER_SIZE) % RING_BUFFER_SIZE;
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte = ring[(payload_start + i) % RING_BUFFER_SIZE];
        }

        let total_size = HEADER_SIZE + payload_size;
        let new_read_off = (read_off as usize + total_size) % RING_BUFFER_SIZE;

        // Advance read offset
        self.header()
            .read_offset
            .store(new_read_off as u32, Ordering::Release);

        Some(Packet {
            header: pkt_header,
            payload,
        })
    }
}

impl Drop for ControlHost {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Handle to the control channel (bootstrap side - opens existing mapping)
pub struct ControlClient {
    #[allow(dead_code)]
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
}

// SAFETY: ControlClient can be sent between threads
unsafe impl Send for ControlClient {}
unsafe impl Sync for ControlClient {}

impl ControlClient {
    /// Open the control channel for the given injection session
    pub fn open(channel: &str) -> Win32Result<Self> {
        let name_wide = mapping_name(channel);

        unsafe {
            let handle = OpenFileMappingW(
                (FILE_MAP_READ | FILE_MAP_WRITE).0,
                false,
                PCWSTR(name_wide.as_ptr()),
            )?;

            let view = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, CONTROL_CHANNEL_SIZE);
            if view.Value.is_null() {
                CloseHandle(handle)?;
                return Err(Win32Error::from_win32());
            }

            // Verify magic
            let header = &*(view.Value as *const ControlHeader);
            if header.magic != MAGIC {
                UnmapViewOfFile(view)?;
                CloseHandle(handle)?;
                return Err(Win32Error::from_win32());
            }

            Ok(Self { handle, view })
        }
    }

    fn header(&self) -> &ControlHeader {
        unsafe { &*(self.view.Value as *const ControlHeader) }
    }

    fn ring_buffer_mut(&mut self) -> &mut [u8] {
        unsafe {
            let ptr = (self.view.Value as *mut u8).add(CONTROL_HEADER_SIZE);
            std::slice::from_raw_parts_mut(ptr, RING_BUFFER_SIZE)
        }
    }

    /// Confirm the host is listening.
    ///
    /// Publishes a new ping sequence and waits for the host to echo it.
    /// There is no deadline on the wait itself; the call fails only when the
    /// host process cannot be opened or terminates while we wait.
    pub fn ping(&mut self) -> Result<()> {
        let header = self.header();
        let seq = header.ping_seq.load(Ordering::Acquire).wrapping_add(1);
        let host_pid = header.host_pid;

        let host = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, host_pid) }
            .map_err(|e| Error::HostUnreachable(format!("host {host_pid} not found: {e}")))?;

        header.ping_seq.store(seq, Ordering::Release);

        let result = loop {
            if self.header().pong_seq.load(Ordering::Acquire) == seq {
                break Ok(());
            }
            if unsafe { WaitForSingleObject(host, 0) } != WAIT_TIMEOUT {
                break Err(Error::HostUnreachable(format!(
                    "host {host_pid} exited before answering"
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        unsafe {
            let _ = CloseHandle(host);
        }
        result
    }

    /// Push a packet to the ring buffer
    pub fn push_packet(&mut self, packet: Packet) {
        let bytes = packet.to_bytes();
        let total_size = bytes.len();

        let write_off = self.header().write_offset.load(Ordering::Acquire) as usize;
        let ring = self.ring_buffer_mut();

        // Write bytes with wrap-around
        for (i, &byte) in bytes.iter().enumerate() {
            ring[(write_off + i) % RING_BUFFER_SIZE] = byte;
        }

        let new_write_off = (write_off + total_size) % RING_BUFFER_SIZE;
        self.header()
            .write_offset
            .store(new_write_off as u32, Ordering::Release);
    }

    /// Helper to send a debug log message
    pub fn debug(&mut self, text: &str) {
        self.push_packet(Packet::log(LogLevel::Debug, text));
    }

    /// Helper to send an info log message
    pub fn info(&mut self, text: &str) {
        self.push_packet(Packet::log(LogLevel::Info, text));
    }

    /// Helper to send a warning log message
    pub fn warn(&mut self, text: &str) {
        self.push_packet(Packet::log(LogLevel::Warning, text));
    }

    /// Helper to send an error log message
    pub fn error(&mut self, text: &str) {
        self.push_packet(Packet::log(LogLevel::Error, text));
    }

    /// Signal a completed injection
    pub fn notify_completed(&mut self, pid: u32) {
        self.push_packet(Packet::completed(pid));
    }

    /// Forward a structured failure report
    pub fn notify_failed(&mut self, pid: u32, report: &FailureReport) {
        self.push_packet(Packet::failed(pid, report));
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.handle);
        }
    }
}
