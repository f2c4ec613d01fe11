//! Message protocol for the control channel
//!
//! Packet format:
//! ```text
//! ┌──────────────┐
//! │ magic: u32   │  <- 0x48424F54 "HBOT"
//! │ id: u32      │  <- packet type
//! │ size: u32    │  <- payload size in bytes
//! │ payload...   │  <- variable length, format depends on packet type
//! └──────────────┘
//! ```

use crate::MAGIC;

/// Packet header size in bytes
pub const HEADER_SIZE: usize = 12; // magic + id + size

/// Maximum payload size (16KB)
pub const MAX_PAYLOAD_SIZE: usize = 16384;

/// Packet types (id field)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketId {
    /// No packet / invalid
    None = 0,
    /// Log message forwarded from the bootstrap (payload: LogLevel + UTF-8 string)
    Log = 1,
    /// Injection completed (payload: injected process id as u32)
    Completed = 2,
    /// Injection failed (payload: process id as u32 + serialized FailureReport)
    Failed = 3,
}

impl From<u32> for PacketId {
    fn from(v: u32) -> Self {
        match v {
            1 => PacketId::Log,
            2 => PacketId::Completed,
            3 => PacketId::Failed,
            _ => PacketId::None,
        }
    }
}

/// Log levels for Log packets
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug message
    Debug = 0,
    /// Informational message
    Info = 1,
    /// Warning message
    Warning = 2,
    /// Error message
    Error = 3,
}

impl From<u8> for LogLevel {
    fn from(v: u8) -> Self {
        match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Bootstrap stage a failure report belongs to
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Decoding an individual user argument
    ArgumentDecode = 0,
    /// Loading the user module (by identity and by path)
    ModuleLoad = 1,
    /// Locating the entry point inside the loaded module
    EntryPoint = 2,
    /// Validating the entry point signature against the arguments
    Signature = 3,
    /// Constructing the entry point instance
    Construct = 4,
    /// Executing the entry point run method
    Run = 5,
    /// Anything else
    Internal = 6,
}

impl From<u8> for FailureStage {
    fn from(v: u8) -> Self {
        match v {
            0 => FailureStage::ArgumentDecode,
            1 => FailureStage::ModuleLoad,
            2 => FailureStage::EntryPoint,
            3 => FailureStage::Signature,
            4 => FailureStage::Construct,
            5 => FailureStage::Run,
            _ => FailureStage::Internal,
        }
    }
}

/// Structured error detail forwarded to the host on a failed injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Stage the bootstrap failed in
    pub stage: FailureStage,
    /// Human-readable description
    pub message: String,
    /// Full error detail (debug representation, chain included)
    pub detail: String,
}

/// Packet header (12 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    /// Magic value for validation
    pub magic: u32,
    /// Packet type identifier
    pub id: u32,
    /// Payload size in bytes
    pub size: u32,
}

impl PacketHeader {
    /// Create a new packet header
    pub fn new(id: PacketId, payload_size: usize) -> Self {
        Self {
            magic: MAGIC,
            id: id as u32,
            size: payload_size as u32,
        }
    }

    /// Check if header has valid magic and reasonable size
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.size as usize <= MAX_PAYLOAD_SIZE
    }

    /// Get the packet type
    pub fn packet_id(&self) -> PacketId {
        PacketId::from(self.id)
    }

    /// Serialize header to bytes (little-endian)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.id.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            size: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// A complete packet with header and payload
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header containing type and size
    pub header: PacketHeader,
    /// Variable-length payload data
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a log message packet
    pub fn log(level: LogLevel, message: &str) -> Self {
        let mut payload = Vec::with_capacity(1 + message.len());
        payload.push(level as u8);
        payload.extend_from_slice(message.as_bytes());
        Self {
            header: PacketHeader::new(PacketId::Log, payload.len()),
            payload,
        }
    }

    /// Create a completion packet
    pub fn completed(pid: u32) -> Self {
        Self {
            header: PacketHeader::new(PacketId::Completed, 4),
            payload: pid.to_le_bytes().to_vec(),
        }
    }

    /// Create a failure packet
    /// Format: pid(u32) + stage(u8) + message_len(u16) + message + detail_len(u16) + detail
    pub fn failed(pid: u32, report: &FailureReport) -> Self {
        let message = report.message.as_bytes();
        let detail = report.detail.as_bytes();
        let mut payload = Vec::with_capacity(4 + 1 + 2 + message.len() + 2 + detail.len());

        payload.extend_from_slice(&pid.to_le_bytes());
        payload.push(report.stage as u8);
        payload.extend_from_slice(&(message.len() as u16).to_le_bytes());
        payload.extend_from_slice(message);
        payload.extend_from_slice(&(detail.len() as u16).to_le_bytes());
        payload.extend_from_slice(detail);

        Self {
            header: PacketHeader::new(PacketId::Failed, payload.len()),
            payload,
        }
    }

    /// Get packet ID
    pub fn id(&self) -> PacketId {
        self.header.packet_id()
    }

    /// Get log level (for Log packets)
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.id() == PacketId::Log && !self.payload.is_empty() {
            Some(LogLevel::from(self.payload[0]))
        } else {
            None
        }
    }

    /// Get message text (for Log packets)
    pub fn message(&self) -> &str {
        match self.id() {
            PacketId::Log if !self.payload.is_empty() => {
                std::str::from_utf8(&self.payload[1..]).unwrap_or("")
            }
            _ => "",
        }
    }

    /// Get the injected process id (for Completed packets)
    pub fn completed_pid(&self) -> Option<u32> {
        if self.id() == PacketId::Completed && self.payload.len() >= 4 {
            Some(u32::from_le_bytes(self.payload[0..4].try_into().ok()?))
        } else {
            None
        }
    }

    /// Parse a failure packet. Returns (pid, report).
    pub fn failure(&self) -> Option<(u32, FailureReport)> {
        if self.id() != PacketId::Failed || self.payload.len() < 7 {
            return None;
        }

        let pid = u32::from_le_bytes(self.payload[0..4].try_into().ok()?);
        let stage = FailureStage::from(self.payload[4]);
        let mut offset = 5;

        let message_len =
            u16::from_le_bytes([self.payload[offset], self.payload[offset + 1]]) as usize;
        offset += 2;
        if offset + message_len > self.payload.len() {
            return None;
        }
        let message =
            String::from_utf8_lossy(&self.payload[offset..offset + message_len]).to_string();
        offset += message_len;

        if offset + 2 > self.payload.len() {
            return None;
        }
        let detail_len =
            u16::from_le_bytes([self.payload[offset], self.payload[offset + 1]]) as usize;
        offset += 2;
        if offset + detail_len > self.payload.len() {
            return None;
        }
        let detail =
            String::from_utf8_lossy(&self.payload[offset..offset + detail_len]).to_string();

        Some((
            pid,
            FailureReport {
                stage,
                message,
                detail,
            },
        ))
    }

    /// Total size in bytes (header + payload)
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_size());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let header = PacketHeader::from_bytes(bytes)?;
        if !header.is_valid() {
            return None;
        }
        let payload_end = HEADER_SIZE + header.size as usize;
        if bytes.len() < payload_end {
            return None;
        }
        Some(Self {
            header,
            payload: bytes[HEADER_SIZE..payload_end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_packet() {
        let pkt = Packet::log(LogLevel::Warning, "careful");
        assert_eq!(pkt.id(), PacketId::Log);
        assert_eq!(pkt.log_level(), Some(LogLevel::Warning));
        assert_eq!(pkt.message(), "careful");
    }

    #[test]
    fn test_completed_packet() {
        let pkt = Packet::completed(4321);
        let parsed = Packet::from_bytes(&pkt.to_bytes()).unwrap();
        assert_eq!(parsed.completed_pid(), Some(4321));
        assert!(parsed.failure().is_none());
    }

    #[test]
    fn test_failed_packet() {
        let report = FailureReport {
            stage: FailureStage::Construct,
            message: "boom".into(),
            detail: "Construct(\"boom\")".into(),
        };
        let pkt = Packet::failed(77, &report);
        let parsed = Packet::from_bytes(&pkt.to_bytes()).unwrap();
        let (pid, got) = parsed.failure().unwrap();
        assert_eq!(pid, 77);
        assert_eq!(got, report);
    }

    #[test]
    fn test_truncated_failed_packet_rejected() {
        let report = FailureReport {
            stage: FailureStage::Run,
            message: "late failure".into(),
            detail: String::new(),
        };
        let mut pkt = Packet::failed(1, &report);
        pkt.payload.truncate(6);
        assert!(pkt.failure().is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Packet::completed(1).to_bytes();
        bytes[0] ^= 0xFF;
        assert!(Packet::from_bytes(&bytes).is_none());
    }
}
