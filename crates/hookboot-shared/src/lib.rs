//! Shared types and control-channel protocol for hookboot
//!
//! Communication between the host tool and the injected bootstrap uses
//! shared memory (file mapping), keyed by an injection channel name.
//!
//! # Architecture
//!
//! - [`ControlHost`] - created by the host before injection, owns the mapping,
//!   answers liveness pings and drains packets
//! - [`ControlClient`] - opened by the bootstrap inside the target process,
//!   confirms liveness and reports progress, logs and failures

pub mod error;
#[cfg(windows)]
pub mod ipc;
pub mod messages;
pub mod plugin;
pub mod wire;

pub use error::{Error, Result};
#[cfg(windows)]
pub use ipc::*;
pub use messages::*;
pub use plugin::{
    EntryDescriptor, EntryPoint, EntryTable, ParamKind, ParamShape, PluginError, RemoteContext,
    ENTRY_TABLE_SYMBOL, PLUGIN_API_VERSION,
};
pub use wire::{PluginValue, RemoteInfo, WireError};

/// Mapping name format - includes the channel name for uniqueness
pub const CONTROL_CHANNEL_PREFIX: &str = "HOOKBOOT_CTL_";

/// Size of the shared memory region (32KB)
pub const CONTROL_CHANNEL_SIZE: usize = 32 * 1024;

/// Magic value to identify valid shared memory ("HBOT")
pub const MAGIC: u32 = 0x48424F54;
