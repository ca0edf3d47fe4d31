//! `sippak`: run one SIP action against a destination and exit.

use std::process::ExitCode;

use sip_core::SipError;
use thiserror::Error;

pub mod binder;
pub mod dispatch;
pub mod headers;
pub mod logging;
pub mod session;
pub mod settings;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown command {0:?}, see --help")]
    UnknownCommand(String),
    #[error("{step} failed: {source}")]
    EngineSetup {
        step: &'static str,
        #[source]
        source: SipError,
    },
    #[error("failed to configure name servers: {0}")]
    Resolver(#[source] SipError),
    #[error("sip error: {0}")]
    Sip(#[from] SipError),
}

/// Process exit status for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// The exchange completed with a failure (non-2xx, auth, timeout).
    Failure,
    InvalidArgument,
    EngineSetup,
    Resolver,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::InvalidArgument => 2,
            ExitStatus::EngineSetup => 3,
            ExitStatus::Resolver => 4,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

impl AppError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            AppError::InvalidArgument(_) | AppError::UnknownCommand(_) => ExitStatus::InvalidArgument,
            AppError::EngineSetup { .. } => ExitStatus::EngineSetup,
            AppError::Resolver(_) => ExitStatus::Resolver,
            AppError::Sip(_) => ExitStatus::Failure,
        }
    }
}

pub fn run(config: &settings::InvocationConfig) -> Result<ExitStatus, AppError> {
    dispatch::run(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_distinct_codes() {
        let setup = AppError::EngineSetup {
            step: "transport",
            source: SipError::Invalid("x"),
        };
        assert_eq!(setup.exit_status().code(), 3);
        assert_eq!(AppError::Resolver(SipError::Resolver("x".into())).exit_status().code(), 4);
        assert_eq!(AppError::UnknownCommand("FOO".into()).exit_status().code(), 2);
        assert_eq!(AppError::InvalidArgument("x".into()).exit_status().code(), 2);
        assert_eq!(ExitStatus::Success.code(), 0);
    }
}
