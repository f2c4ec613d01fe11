//! Host end of the control channel.
//!
//! Answers liveness pings from the bootstrap, forwards its log packets into
//! our own diagnostics, and blocks until a terminal notification arrives.

use std::time::Duration;

use hookboot_shared::ipc::ControlHost;
use hookboot_shared::{LogLevel, PacketId};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Terminal state reported by the injected bootstrap.
#[derive(Debug)]
pub enum Outcome {
    /// The entry point was constructed and is running in PID
    Completed(u32),
    /// The bootstrap failed; stage and message as reported
    Failed(u32, String),
}

/// Drive the channel until the bootstrap reports a terminal state.
///
/// There is no deadline: the bootstrap side has none either, and a hung
/// target is the operator's call to interrupt.
pub fn wait_for_outcome(host: &mut ControlHost) -> Outcome {
    loop {
        let Some(packet) = host.pump() else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };

        match packet.id() {
            PacketId::Log => {
                let text = packet.message();
                match packet.log_level() {
                    Some(LogLevel::Debug) => tracing::debug!(target: "remote", "{text}"),
                    Some(LogLevel::Warning) => tracing::warn!(target: "remote", "{text}"),
                    Some(LogLevel::Error) => tracing::error!(target: "remote", "{text}"),
                    _ => tracing::info!(target: "remote", "{text}"),
                }
            }
            PacketId::Completed => {
                if let Some(pid) = packet.completed_pid() {
                    return Outcome::Completed(pid);
                }
            }
            PacketId::Failed => {
                if let Some((pid, report)) = packet.failure() {
                    tracing::error!(
                        target: "remote",
                        stage = ?report.stage,
                        detail = %report.detail,
                        "injection failed"
                    );
                    return Outcome::Failed(pid, report.message);
                }
            }
            PacketId::None => {}
        }
    }
}
