//! Error types for hookboot.

use thiserror::Error;

use crate::messages::{FailureReport, FailureStage};
use crate::wire::WireError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed parameter block: {0}")]
    MalformedParams(String),

    #[error("payload envelope rejected: {0}")]
    Envelope(#[from] WireError),

    #[error("argument {index} could not be decoded: {source}")]
    ArgumentDecode { index: usize, source: WireError },

    #[error("control channel '{channel}' unavailable: {reason}")]
    Connect { channel: String, reason: String },

    #[error("host liveness check failed: {0}")]
    HostUnreachable(String),

    #[error("could not load module {path}, {identity}")]
    ModuleLoad { path: String, identity: String },

    #[error("the module does not expose a hookboot entry table")]
    EntryPointNotFound,

    #[error("the module exposes {0} entry points where exactly one is expected")]
    AmbiguousEntryPoint(usize),

    #[error("the entry table speaks plugin api v{module}, this bootstrap speaks v{host}")]
    ApiVersionMismatch { module: u32, host: u32 },

    #[error("the entry point declares {declared} parameters but {supplied} arguments were supplied")]
    ParameterCountMismatch { declared: usize, supplied: usize },

    #[error("entry point parameter {index} declared as {declared} does not accept a {supplied} argument")]
    ParameterTypeMismatch {
        index: usize,
        declared: &'static str,
        supplied: &'static str,
    },

    #[error("entry point construction failed: {0}")]
    Construct(String),

    #[error("entry point run failed: {0}")]
    Run(String),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    Windows(#[from] windows::core::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Which bootstrap stage this error belongs to, for host reporting.
    pub fn stage(&self) -> FailureStage {
        match self {
            Error::ArgumentDecode { .. } => FailureStage::ArgumentDecode,
            Error::ModuleLoad { .. } => FailureStage::ModuleLoad,
            Error::EntryPointNotFound
            | Error::AmbiguousEntryPoint(_)
            | Error::ApiVersionMismatch { .. } => FailureStage::EntryPoint,
            Error::ParameterCountMismatch { .. } | Error::ParameterTypeMismatch { .. } => {
                FailureStage::Signature
            }
            Error::Construct(_) => FailureStage::Construct,
            Error::Run(_) => FailureStage::Run,
            _ => FailureStage::Internal,
        }
    }

    /// Structured detail forwarded to the host on post-connection failures.
    pub fn failure_report(&self) -> FailureReport {
        FailureReport {
            stage: self.stage(),
            message: self.to_string(),
            detail: format!("{self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        let err = Error::ParameterCountMismatch {
            declared: 2,
            supplied: 3,
        };
        assert_eq!(err.stage(), FailureStage::Signature);
        assert_eq!(Error::EntryPointNotFound.stage(), FailureStage::EntryPoint);
        assert_eq!(Error::AmbiguousEntryPoint(2).stage(), FailureStage::EntryPoint);
        assert_eq!(
            Error::MalformedParams("x".into()).stage(),
            FailureStage::Internal
        );
    }

    #[test]
    fn test_failure_report_carries_message() {
        let err = Error::ModuleLoad {
            path: "C:\\plugin.dll".into(),
            identity: "plugin".into(),
        };
        let report = err.failure_report();
        assert_eq!(report.stage, FailureStage::ModuleLoad);
        assert!(report.message.contains("C:\\plugin.dll"));
        assert!(report.message.contains("plugin"));
    }
}
