//! Serialized payload handed from the host into the bootstrap.
//!
//! Envelope layout (little-endian):
//! ```text
//! ┌───────────────────────┐
//! │ magic: u32            │  <- 0x48425249 "HBRI"
//! │ version: u16          │
//! │ channel: str16        │  <- u16 length + UTF-8 bytes
//! │ host_pid: u32         │
//! │ module_path: str16    │
//! │ module_identity: str16│
//! │ arg_count: u16        │
//! │ args: (u32 len + blob)* │
//! └───────────────────────┘
//! ```
//!
//! Each argument blob is an independently decodable tagged value, so the
//! bootstrap can defer argument decoding until after the user module is
//! loaded without the envelope caring what is inside.

use thiserror::Error;

/// Magic value identifying a remote-info envelope ("HBRI")
pub const ENVELOPE_MAGIC: u32 = 0x48425249;

/// Current envelope version
pub const ENVELOPE_VERSION: u16 = 1;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer truncated")]
    Truncated,

    #[error("bad envelope magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported envelope version {0}")]
    BadVersion(u16),

    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid bool byte {0}")]
    InvalidBool(u8),

    #[error("trailing bytes after value")]
    TrailingBytes,
}

/// Cursor over a byte buffer for decoding.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str16(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

fn put_str16(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Decoded injection parameters, owned for the lifetime of one bootstrap
/// invocation. User arguments stay as raw blobs until the module is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Control channel identifier, globally unique per injection session
    pub channel_name: String,
    /// PID of the process that performed the injection
    pub host_pid: u32,
    /// File path of the user module (private deployment)
    pub module_path: String,
    /// Logical name of the user module (searched deployment); may be empty
    pub module_identity: String,
    /// Independently serialized user arguments, in call order
    pub user_args: Vec<Vec<u8>>,
}

impl RemoteInfo {
    /// Serialize into an envelope for the remote parameter block.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
        out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        put_str16(&mut out, &self.channel_name);
        out.extend_from_slice(&self.host_pid.to_le_bytes());
        put_str16(&mut out, &self.module_path);
        put_str16(&mut out, &self.module_identity);
        out.extend_from_slice(&(self.user_args.len() as u16).to_le_bytes());
        for arg in &self.user_args {
            out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
            out.extend_from_slice(arg);
        }
        out
    }

    /// Decode an envelope copied out of the remote parameter block.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);

        let magic = r.u32()?;
        if magic != ENVELOPE_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = r.u16()?;
        if version != ENVELOPE_VERSION {
            return Err(WireError::BadVersion(version));
        }

        let channel_name = r.str16()?;
        let host_pid = r.u32()?;
        let module_path = r.str16()?;
        let module_identity = r.str16()?;

        let arg_count = r.u16()? as usize;
        let mut user_args = Vec::with_capacity(arg_count.min(64));
        for _ in 0..arg_count {
            let len = r.u32()? as usize;
            user_args.push(r.take(len)?.to_vec());
        }

        Ok(Self {
            channel_name,
            host_pid,
            module_path,
            module_identity,
            user_args,
        })
    }
}

/// A single user argument, self-describing on the wire.
///
/// Tag byte followed by the value bytes; strings are u16 length-prefixed,
/// byte blobs u32 length-prefixed.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I32: u8 = 2;
const TAG_I64: u8 = 3;
const TAG_U64: u8 = 4;
const TAG_F64: u8 = 5;
const TAG_STR: u8 = 6;
const TAG_BYTES: u8 = 7;

impl PluginValue {
    /// Serialize into a standalone argument blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        match self {
            PluginValue::Null => out.push(TAG_NULL),
            PluginValue::Bool(v) => {
                out.push(TAG_BOOL);
                out.push(*v as u8);
            }
            PluginValue::I32(v) => {
                out.push(TAG_I32);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PluginValue::I64(v) => {
                out.push(TAG_I64);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PluginValue::U64(v) => {
                out.push(TAG_U64);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PluginValue::F64(v) => {
                out.push(TAG_F64);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PluginValue::Str(v) => {
                out.push(TAG_STR);
                put_str16(&mut out, v);
            }
            PluginValue::Bytes(v) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                out.extend_from_slice(v);
            }
        }
        out
    }

    /// Decode a standalone argument blob. The blob must contain exactly one
    /// value; trailing bytes are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let value = match r.u8()? {
            TAG_NULL => PluginValue::Null,
            TAG_BOOL => match r.u8()? {
                0 => PluginValue::Bool(false),
                1 => PluginValue::Bool(true),
                other => return Err(WireError::InvalidBool(other)),
            },
            TAG_I32 => PluginValue::I32(r.u32()? as i32),
            TAG_I64 => PluginValue::I64(r.u64()? as i64),
            TAG_U64 => PluginValue::U64(r.u64()?),
            TAG_F64 => PluginValue::F64(f64::from_bits(r.u64()?)),
            TAG_STR => PluginValue::Str(r.str16()?),
            TAG_BYTES => {
                let len = r.u32()? as usize;
                PluginValue::Bytes(r.take(len)?.to_vec())
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        if r.remaining() != 0 {
            return Err(WireError::TrailingBytes);
        }
        Ok(value)
    }

    /// Name of the runtime kind, for mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PluginValue::Null => "null",
            PluginValue::Bool(_) => "bool",
            PluginValue::I32(_) => "i32",
            PluginValue::I64(_) => "i64",
            PluginValue::U64(_) => "u64",
            PluginValue::F64(_) => "f64",
            PluginValue::Str(_) => "str",
            PluginValue::Bytes(_) => "bytes",
        }
    }
}
