//! Re-entrancy guard for injection channels.
//!
//! The native loader may invoke the bootstrap more than once for the same
//! logical injection. Only the first invocation per channel does real work;
//! the registry is how later ones find out. It is a guard, not a session
//! table: a name is present only between "connected" and terminal.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Process-wide set of channels with a bootstrap invocation in flight.
///
/// Passed into the orchestrator by reference; the global instance exists so
/// concurrent re-entrant invocations on different threads contend on one
/// lock.
pub struct ChannelRegistry {
    active: Mutex<HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Claim a channel for this invocation.
    ///
    /// Returns `None` if the channel is already active (duplicate
    /// invocation). The returned lease releases the claim on drop.
    pub fn try_begin<'r>(&'r self, channel: &str) -> Option<ChannelLease<'r>> {
        let mut active = self.lock();
        if !active.insert(channel.to_owned()) {
            return None;
        }
        Some(ChannelLease {
            registry: self,
            channel: channel.to_owned(),
        })
    }

    /// Remove a channel claim. Idempotent.
    pub fn end(&self, channel: &str) {
        self.lock().remove(channel);
    }

    /// Whether a channel currently has an invocation in flight.
    pub fn is_active(&self, channel: &str) -> bool {
        self.lock().contains(channel)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // a poisoned registry would wedge every later injection; the set
        // itself cannot be left inconsistent by a panic
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped claim on a channel name. Dropping the lease ends the session.
pub struct ChannelLease<'r> {
    registry: &'r ChannelRegistry,
    channel: String,
}

impl ChannelLease<'_> {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        self.registry.end(&self.channel);
    }
}

static PROCESS_REGISTRY: Lazy<ChannelRegistry> = Lazy::new(ChannelRegistry::new);

/// The registry shared by every bootstrap invocation in this process.
pub fn process_registry() -> &'static ChannelRegistry {
    &PROCESS_REGISTRY
}
