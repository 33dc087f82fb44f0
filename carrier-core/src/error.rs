//! Error types: native failure codes, bridge errors, and the caller-facing command error.

use crate::handle::HandleKind;

/// Message shown to the external caller for any unresolvable id.
pub const INVALID_ID: &str = "Id invalid!";

/// Facility bits of the SDK's general error codes.
const GENERAL_FACILITY: u32 = 0x8100_0000;

/// Failure code reported by the native carrier library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("native error 0x{code:x}")]
pub struct NativeError {
    pub code: u32,
}

impl NativeError {
    pub const INVALID_ARGS: NativeError = NativeError::general(0x01);
    pub const OUT_OF_MEMORY: NativeError = NativeError::general(0x02);
    pub const BAD_PERSISTENT_DATA: NativeError = NativeError::general(0x04);
    pub const INVALID_PERSISTENCE_FILE: NativeError = NativeError::general(0x05);
    pub const ALREADY_RUN: NativeError = NativeError::general(0x08);
    pub const NOT_READY: NativeError = NativeError::general(0x09);
    pub const NOT_EXIST: NativeError = NativeError::general(0x0A);
    pub const ALREADY_EXIST: NativeError = NativeError::general(0x0B);
    pub const NO_MATCHED_REQUEST: NativeError = NativeError::general(0x0C);
    pub const INVALID_USERID: NativeError = NativeError::general(0x0D);
    pub const WRONG_STATE: NativeError = NativeError::general(0x0F);
    pub const BUSY: NativeError = NativeError::general(0x10);
    pub const LIMIT_EXCEEDED: NativeError = NativeError::general(0x16);

    /// Error in the general facility with the given low code.
    pub const fn general(n: u32) -> Self {
        NativeError {
            code: GENERAL_FACILITY | n,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        NativeError { code }
    }
}

/// Result of a call into the native library.
pub type NativeResult<T> = Result<T, NativeError>;

/// Errors raised inside the bridge before or around a native call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Referenced id does not resolve in the table of its kind.
    #[error("Id invalid!")]
    InvalidHandle(HandleKind),
    /// Missing or malformed command argument; rejected before any native call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Native(#[from] NativeError),
    /// Malformed data while building an outbound event record.
    #[error("event payload error: {0}")]
    EventPayload(String),
}

impl BridgeError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(msg.into())
    }

    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, BridgeError::InvalidHandle(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, BridgeError::InvalidArgument(_))
    }

    /// Native failure code, if the error came from the native library.
    pub fn native_code(&self) -> Option<u32> {
        match self {
            BridgeError::Native(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Failure outcome of one dispatched command, as surfaced to the external caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", caller_message(.command, .source))]
pub struct CommandError {
    pub command: String,
    #[source]
    pub source: BridgeError,
}

/// Native failures name the command and code; everything else shows as is.
fn caller_message(command: &str, source: &BridgeError) -> String {
    match source {
        BridgeError::Native(e) => format!("{command} error (0x{:x})", e.code),
        other => other.to_string(),
    }
}

impl CommandError {
    pub fn new(command: impl Into<String>, source: BridgeError) -> Self {
        Self {
            command: command.into(),
            source,
        }
    }

    pub fn kind(&self) -> &BridgeError {
        &self.source
    }
}
