//! Collaborator seams of the bootstrap.
//!
//! The orchestrator talks to the host and to the hook engine through these
//! traits so every exit path is observable in tests. Production wires in the
//! shared-memory [`ControlClient`] and the release callback registered by
//! the native trampoline engine.

use hookboot_shared::{FailureReport, Result};

/// The host's control interface, as seen by the bootstrap.
///
/// Notifications are fire-and-forget: they must not fail the bootstrap, and
/// they are attempted inside the cleanup path.
pub trait HostLink {
    /// Confirm the host is alive and listening.
    fn ping(&mut self) -> Result<()>;

    /// Report a successful injection.
    fn notify_completed(&mut self, pid: u32);

    /// Forward a structured failure.
    fn notify_failed(&mut self, pid: u32, report: &FailureReport);

    /// Mirror a diagnostic comment to the host.
    fn comment(&mut self, text: &str);

    /// Mirror a warning to the host.
    fn warn(&mut self, text: &str);

    /// Mirror an error to the host.
    fn error(&mut self, text: &str);
}

/// Connects a [`HostLink`] for a channel name.
pub trait HostConnector {
    type Link: HostLink;

    fn connect(&self, channel: &str) -> Result<Self::Link>;
}

/// The external hook trampoline engine, reduced to the one operation the
/// bootstrap owes it: releasing all hook state on the way out.
pub trait HookEngine {
    fn release_all(&mut self);
}

#[cfg(windows)]
pub use windows_impl::IpcConnector;

#[cfg(windows)]
mod windows_impl {
    use hookboot_shared::ipc::ControlClient;
    use hookboot_shared::{Error, FailureReport, Result};

    use super::{HostConnector, HostLink};

    /// Production connector backed by the shared-memory control channel.
    pub struct IpcConnector;

    impl HostConnector for IpcConnector {
        type Link = ControlClient;

        fn connect(&self, channel: &str) -> Result<Self::Link> {
            ControlClient::open(channel).map_err(|e| Error::Connect {
                channel: channel.to_owned(),
                reason: e.to_string(),
            })
        }
    }

    impl HostLink for ControlClient {
        fn ping(&mut self) -> Result<()> {
            ControlClient::ping(self)
        }

        fn notify_completed(&mut self, pid: u32) {
            ControlClient::notify_completed(self, pid);
        }

        fn notify_failed(&mut self, pid: u32, report: &FailureReport) {
            ControlClient::notify_failed(self, pid, report);
        }

        fn comment(&mut self, text: &str) {
            self.info(text);
        }

        fn warn(&mut self, text: &str) {
            ControlClient::warn(self, text);
        }

        fn error(&mut self, text: &str) {
            ControlClient::error(self, text);
        }
    }
}

/// Hook-release callback registered by the embedding hook engine.
///
/// The trampoline engine is an external collaborator; it hands the bootstrap
/// a release function at initialization time. Releasing with nothing
/// registered is a no-op.
pub mod hooks {
    use once_cell::sync::OnceCell;

    use super::HookEngine;

    static RELEASE: OnceCell<fn()> = OnceCell::new();

    /// Register the engine's release-all callback. Later registrations are
    /// ignored.
    pub fn register_release(f: fn()) {
        let _ = RELEASE.set(f);
    }

    /// Production hook engine: invokes the registered callback, if any.
    pub struct RegisteredHooks;

    impl HookEngine for RegisteredHooks {
        fn release_all(&mut self) {
            match RELEASE.get() {
                Some(release) => release(),
                None => tracing::debug!("no hook release callback registered"),
            }
        }
    }
}
