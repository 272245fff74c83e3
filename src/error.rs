// Typed failures returned to remote callers

use std::fmt;

use thiserror::Error;

use crate::hci::ChannelError;
use crate::store::StoreError;

/// Prefix of every symbolic error name placed on the wire.
pub const ERROR_DOMAIN: &str = "org.bluez.Error";

/// Why a hardware command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The controller answered with a non-zero HCI status code.
    Status(u8),
    /// The command never produced a usable answer (I/O error, timeout, bad reply).
    Channel(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "controller status 0x{status:02x}"),
            Self::Channel(message) => f.write_str(message),
        }
    }
}

/// Every failure a request can end with. Exactly one of these is attached to
/// a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("interface {interface} is not handled here")]
    UnknownInterface { interface: String },

    #[error("no adapter registered at {path}")]
    UnknownPath { path: String },

    #[error("unknown method {method}")]
    UnknownMethod { method: String },

    #[error("method {method} does not accept signature '{signature}'")]
    WrongSignature { method: String, signature: String },

    #[error("invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("adapter hci{index} is not available")]
    NoSuchAdapter { index: u16 },

    #[error("hardware command failed: {0}")]
    HardwareCommandFailed(Fault),

    #[error("out of memory")]
    OutOfMemory,

    #[error("not authorized")]
    NotAuthorized,

    #[error("discovery already in progress")]
    DiscoveryAlreadyInProgress,

    #[error("no connection to {address}")]
    ConnectionNotFound { address: String },

    #[error("record not found: {message}")]
    RecordNotFound { message: String },

    #[error("{method} is not implemented")]
    NotImplemented { method: String },

    #[error("attribute storage failed: {message}")]
    StorageFailed { message: String },
}

impl AdapterError {
    /// Short kind name, e.g. `NotAuthorized`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownInterface { .. } => "UnknownInterface",
            Self::UnknownPath { .. } => "UnknownPath",
            Self::UnknownMethod { .. } => "UnknownMethod",
            Self::WrongSignature { .. } => "WrongSignature",
            Self::InvalidParameter { .. } => "InvalidParameter",
            Self::NoSuchAdapter { .. } => "NoSuchAdapter",
            Self::HardwareCommandFailed(_) => "HardwareCommandFailed",
            Self::OutOfMemory => "OutOfMemory",
            Self::NotAuthorized => "NotAuthorized",
            Self::DiscoveryAlreadyInProgress => "DiscoveryAlreadyInProgress",
            Self::ConnectionNotFound { .. } => "ConnectionNotFound",
            Self::RecordNotFound { .. } => "RecordNotFound",
            Self::NotImplemented { .. } => "NotImplemented",
            Self::StorageFailed { .. } => "StorageFailed",
        }
    }

    /// Symbolic wire name, e.g. `org.bluez.Error.NotAuthorized`.
    pub fn name(&self) -> String {
        format!("{ERROR_DOMAIN}.{}", self.kind())
    }

    pub fn unknown_interface(interface: impl Into<String>) -> Self {
        Self::UnknownInterface {
            interface: interface.into(),
        }
    }

    pub fn unknown_path(path: impl Into<String>) -> Self {
        Self::UnknownPath { path: path.into() }
    }

    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    pub fn wrong_signature(method: impl Into<String>, signature: impl Into<String>) -> Self {
        Self::WrongSignature {
            method: method.into(),
            signature: signature.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn connection_not_found(address: impl fmt::Display) -> Self {
        Self::ConnectionNotFound {
            address: address.to_string(),
        }
    }

    pub fn record_not_found(message: impl Into<String>) -> Self {
        Self::RecordNotFound {
            message: message.into(),
        }
    }

    pub fn not_implemented(method: impl Into<String>) -> Self {
        Self::NotImplemented {
            method: method.into(),
        }
    }

    pub fn status(status: u8) -> Self {
        Self::HardwareCommandFailed(Fault::Status(status))
    }
}

impl From<ChannelError> for AdapterError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Rejected { status, .. } => Self::status(status),
            other => Self::HardwareCommandFailed(Fault::Channel(other.to_string())),
        }
    }
}

impl From<StoreError> for AdapterError {
    fn from(error: StoreError) -> Self {
        Self::StorageFailed {
            message: error.to_string(),
        }
    }
}
