//! Error types for module communication and boot operations
//!
//! Every protocol failure carries the operation it happened in and the
//! negative status code the C-style SDK reported for that phase, so layers
//! that still speak status codes can map errors without string matching.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Pixie operations
pub type Result<T> = std::result::Result<T, PixieError>;

/// Top-level operation an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single register access.
    RegisterIo,
    /// Serial-bus transaction (EEPROM or slot expander).
    SerialBus,
    /// Host-bus-request mediated processor memory access.
    DspMemoryIo,
    /// Processor memory burst through the readout FIFO.
    DspBurst,
    /// External FIFO drain.
    FifoDrain,
    /// External memory read or write.
    ExternalMemoryIo,
    /// Hardware-accelerated external memory clear.
    ExternalMemoryClear,
    /// Communications FPGA download.
    CommFpgaBoot,
    /// Signal-processing FPGA download.
    SpFpgaBoot,
    /// Processor program download.
    DspBoot,
    /// Whole-module boot composition.
    BootModule,
    /// Identification EEPROM decode.
    ReadModuleInfo,
    /// Bridge enumeration, slot matching and mapping.
    InitSystem,
    /// Unmap and close of one module.
    CloseModule,
    /// Call into the bridge vendor library.
    Bridge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RegisterIo => "register I/O",
            Self::SerialBus => "serial bus",
            Self::DspMemoryIo => "DSP memory I/O",
            Self::DspBurst => "DSP burst read",
            Self::FifoDrain => "external FIFO read",
            Self::ExternalMemoryIo => "external memory I/O",
            Self::ExternalMemoryClear => "external memory clear",
            Self::CommFpgaBoot => "communications FPGA boot",
            Self::SpFpgaBoot => "signal-processing FPGA boot",
            Self::DspBoot => "DSP boot",
            Self::BootModule => "module boot",
            Self::ReadModuleInfo => "module info",
            Self::InitSystem => "system init",
            Self::CloseModule => "module close",
            Self::Bridge => "bridge",
        };
        f.write_str(name)
    }
}

/// Coarse classification of a [`PixieError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller passed something out of range.
    InvalidArgument,
    /// A bounded poll or retry loop ran out.
    ProtocolTimeout,
    /// The vendor library failed to open, map, transfer or close.
    ResourceFailure,
    /// Firmware or data did not have the expected shape.
    DataIntegrityFailure,
    /// Hardware reported itself busy.
    HardwareBusy,
    /// Host I/O error.
    Io,
}

/// Errors that can occur during Pixie operations
#[derive(Debug, Error)]
pub enum PixieError {
    /// Caller-supplied argument out of range
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// Module index out of range
    #[error("Module index {index} out of range (have {count} modules)")]
    InvalidIndex {
        /// Requested index
        index: usize,
        /// Number of modules in the system
        count: usize,
    },

    /// Bounded poll or retry exhausted
    #[error("{operation}: {phase} timed out after {attempts} attempts")]
    ProtocolTimeout {
        /// Operation that timed out
        operation: Operation,
        /// Phase of the protocol that never completed
        phase: &'static str,
        /// Attempts made before giving up
        attempts: u32,
        /// Legacy status code
        status: i32,
    },

    /// Vendor library or host resource failure
    #[error("{operation}: {reason}")]
    ResourceFailure {
        /// Operation that failed
        operation: Operation,
        /// Reason for failure
        reason: String,
        /// Legacy status code
        status: i32,
    },

    /// Firmware or data shape mismatch
    #[error("{operation}: {reason}")]
    DataIntegrityFailure {
        /// Operation that failed
        operation: Operation,
        /// Reason for failure
        reason: String,
        /// Legacy status code
        status: i32,
    },

    /// Hardware busy or stuck
    #[error("{operation}: hardware busy: {reason}")]
    HardwareBusy {
        /// Operation that failed
        operation: Operation,
        /// Reason for failure
        reason: String,
        /// Legacy status code
        status: i32,
    },

    /// I/O error on the host side
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl PixieError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a protocol timeout error
    pub const fn timeout(operation: Operation, phase: &'static str, attempts: u32, status: i32) -> Self {
        Self::ProtocolTimeout {
            operation,
            phase,
            attempts,
            status,
        }
    }

    /// Create a resource failure error
    pub fn resource(operation: Operation, status: i32, reason: impl Into<String>) -> Self {
        Self::ResourceFailure {
            operation,
            reason: reason.into(),
            status,
        }
    }

    /// Create a data integrity error
    pub fn integrity(operation: Operation, status: i32, reason: impl Into<String>) -> Self {
        Self::DataIntegrityFailure {
            operation,
            reason: reason.into(),
            status,
        }
    }

    /// Create a hardware busy error
    pub fn busy(operation: Operation, status: i32, reason: impl Into<String>) -> Self {
        Self::HardwareBusy {
            operation,
            reason: reason.into(),
            status,
        }
    }

    /// Create a resource failure for a file that could not be read
    pub fn file(operation: Operation, status: i32, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::resource(
            operation,
            status,
            format!("cannot read {}: {err}", path.into().display()),
        )
    }

    /// Classification of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidIndex { .. } => ErrorKind::InvalidArgument,
            Self::ProtocolTimeout { .. } => ErrorKind::ProtocolTimeout,
            Self::ResourceFailure { .. } => ErrorKind::ResourceFailure,
            Self::DataIntegrityFailure { .. } => ErrorKind::DataIntegrityFailure,
            Self::HardwareBusy { .. } => ErrorKind::HardwareBusy,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Legacy negative status code for this failure
    ///
    /// Argument errors report `-1`, the code every legacy entry point used
    /// for a bad module number.
    pub const fn status(&self) -> i32 {
        match self {
            Self::ProtocolTimeout { status, .. }
            | Self::ResourceFailure { status, .. }
            | Self::DataIntegrityFailure { status, .. }
            | Self::HardwareBusy { status, .. } => *status,
            Self::InvalidArgument { .. } | Self::InvalidIndex { .. } | Self::Io { .. } => -1,
        }
    }

    /// Operation the error was raised in, if it carries one
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::ProtocolTimeout { operation, .. }
            | Self::ResourceFailure { operation, .. }
            | Self::DataIntegrityFailure { operation, .. }
            | Self::HardwareBusy { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Re-attribute a nested failure to the enclosing operation and status.
    ///
    /// The kind is kept, along with the reason or the timed-out phase.
    /// Argument and I/O errors pass through.
    #[must_use]
    pub fn within(self, outer: Operation, outer_status: i32) -> Self {
        match self {
            Self::ProtocolTimeout { phase, attempts, .. } => Self::timeout(outer, phase, attempts, outer_status),
            Self::ResourceFailure {
                operation, reason, ..
            } => Self::resource(outer, outer_status, format!("{operation}: {reason}")),
            Self::DataIntegrityFailure {
                operation, reason, ..
            } => Self::integrity(outer, outer_status, format!("{operation}: {reason}")),
            Self::HardwareBusy {
                operation, reason, ..
            } => Self::busy(outer, outer_status, format!("{operation}: {reason}")),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_kind() {
        let e = PixieError::timeout(Operation::CommFpgaBoot, "INIT poll", 10, -2);
        assert_eq!(e.kind(), ErrorKind::ProtocolTimeout);
        assert_eq!(e.status(), -2);
        assert_eq!(e.operation(), Some(Operation::CommFpgaBoot));

        let e = PixieError::InvalidIndex { index: 4, count: 2 };
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
        assert_eq!(e.status(), -1);
    }

    #[test]
    fn test_within_keeps_kind() {
        let inner = PixieError::timeout(Operation::CommFpgaBoot, "DONE verify", 10, -3);
        let outer = inner.within(Operation::BootModule, -25);
        assert_eq!(outer.kind(), ErrorKind::ProtocolTimeout);
        assert_eq!(outer.status(), -25);
        assert_eq!(outer.operation(), Some(Operation::BootModule));
        assert!(matches!(
            outer,
            PixieError::ProtocolTimeout {
                phase: "DONE verify",
                attempts: 10,
                ..
            }
        ));

        let inner = PixieError::integrity(Operation::DspBoot, -4, "unknown tag 0x99");
        let outer = inner.within(Operation::BootModule, -27);
        assert_eq!(outer.kind(), ErrorKind::DataIntegrityFailure);
        assert!(outer.to_string().contains("unknown tag"));
    }

    #[test]
    fn test_display() {
        let e = PixieError::resource(Operation::DspBurst, -2, "DMA channel open failed");
        assert_eq!(e.to_string(), "DSP burst read: DMA channel open failed");
    }
}
