use std::fmt;

use thiserror::Error;

use crate::entity::report::Step;

/// Kind of a failed command, derived from its exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// EPERM, also used by emerge to signal a masked or conflicting package
    Permission,
    /// EINTR or EIO, usually a busy or not yet settled block device
    TransientDevice,
    Fatal,
}

impl FailureClass {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Permission,
            4 | 5 => Self::TransientDevice,
            _ => Self::Fatal,
        }
    }
}

/// A command that ran to completion with a non-zero exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdFailure {
    pub command: String,
    pub code: i32,
    pub description: String,
    pub output: String,
}

impl CmdFailure {
    pub fn class(&self) -> FailureClass {
        FailureClass::from_code(self.code)
    }

    pub fn output_contains(&self, pattern: &str) -> bool {
        self.output.contains(pattern)
    }
}

impl fmt::Display for CmdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command `{}` exited with status {} ({})",
            self.command, self.code, self.description
        )
    }
}

#[derive(Debug, Error)]
pub enum SupError {
    #[error("file error: {1}")]
    FileError(std::io::Error, String),

    #[error("no such device: {0}")]
    NoSuchDevice(String),

    #[error("bad manifest: {0}")]
    BadManifest(String),

    #[error("unrecognized config format: {0}")]
    UnknownConfigFormat(String),

    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("{0}")]
    CmdFailed(CmdFailure),

    #[error("failed to spawn command: {context}")]
    CmdSpawn {
        error: std::io::Error,
        context: String,
    },

    #[error("device {device} still busy after {attempts} attempts: {last}")]
    TransientDevice {
        device: String,
        attempts: usize,
        last: Box<SupError>,
    },

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        last: Box<SupError>,
    },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("chroot error: {0}")]
    Chroot(String),

    #[error("bad cli arguments: {0}")]
    BadArgs(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("installation error at step {step_failed}: {error}")]
    InstallError {
        error: Box<SupError>,
        step_failed: Step,
        steps_performed: Vec<Step>,
    },

    #[error("sup-rs bug: {0}")]
    SupRsBug(String),
}

impl SupError {
    /// Returns the command failure carried by this error, if any
    pub fn cmd_failure(&self) -> Option<&CmdFailure> {
        match self {
            Self::CmdFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_class(&self, class: FailureClass) -> bool {
        self.cmd_failure().is_some_and(|f| f.class() == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_class() {
        let tests = [
            (1, FailureClass::Permission),
            (4, FailureClass::TransientDevice),
            (5, FailureClass::TransientDevice),
            (2, FailureClass::Fatal),
            (127, FailureClass::Fatal),
            (139, FailureClass::Fatal),
        ];

        for (code, expected) in tests {
            assert_eq!(expected, FailureClass::from_code(code), "code {code}");
        }
    }

    #[test]
    fn test_is_class() {
        let err = SupError::CmdFailed(CmdFailure {
            command: "emerge foo".into(),
            code: 1,
            description: "Operation not permitted".into(),
            output: String::new(),
        });

        assert!(err.is_class(FailureClass::Permission));
        assert!(!err.is_class(FailureClass::TransientDevice));
        assert!(!SupError::BadArgs("x".into()).is_class(FailureClass::Fatal));
    }
}
