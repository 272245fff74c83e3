// Command channel to a managed controller
//
// A channel is opened per request and closed when the session is dropped.
// Commands are typed; `opcode` and `parameters` give their HCI encoding.

mod simulated;
mod socket;

pub use simulated::{ControllerState, SimulatedController};
pub use socket::{watch_inquiry_complete, HciSocket, RawHciChannel};

use std::io;
use std::time::Duration;

use bluer::Address;
use thiserror::Error;

use crate::class::DeviceClass;
use crate::session::AdapterHandle;

pub const OGF_LINK_CTL: u16 = 0x01;
pub const OGF_HOST_CTL: u16 = 0x03;
pub const OGF_INFO_PARAM: u16 = 0x04;
pub const OGF_STATUS_PARAM: u16 = 0x05;

pub const OCF_INQUIRY: u16 = 0x0001;
pub const OCF_INQUIRY_CANCEL: u16 = 0x0002;
pub const OCF_DISCONNECT: u16 = 0x0006;
pub const OCF_AUTH_REQUESTED: u16 = 0x0011;
pub const OCF_DELETE_STORED_LINK_KEY: u16 = 0x0012;
pub const OCF_WRITE_LOCAL_NAME: u16 = 0x0013;
pub const OCF_READ_LOCAL_NAME: u16 = 0x0014;
pub const OCF_READ_SCAN_ENABLE: u16 = 0x0019;
pub const OCF_WRITE_SCAN_ENABLE: u16 = 0x001a;
pub const OCF_READ_CLASS_OF_DEV: u16 = 0x0023;
pub const OCF_WRITE_CLASS_OF_DEV: u16 = 0x0024;
pub const OCF_READ_LOCAL_VERSION: u16 = 0x0001;
pub const OCF_READ_ENCRYPTION_KEY_SIZE: u16 = 0x0008;

/// General inquiry access code.
pub const GIAC_LAP: u32 = 0x9e_8b33;
/// Inquiry length in 1.28 s units.
pub const INQUIRY_LENGTH: u8 = 8;
/// Disconnect reason: remote user terminated connection.
pub const REASON_USER_ENDED: u8 = 0x13;
/// Local names are carried in a fixed 248-byte field.
pub const NAME_LENGTH: usize = 248;

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(2000);

pub const fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot open hci{index}: {source}")]
    Open {
        index: u16,
        #[source]
        source: io::Error,
    },

    #[error("command 0x{opcode:04x} timed out")]
    Timeout { opcode: u16 },

    #[error("command 0x{opcode:04x} rejected with status 0x{status:02x}")]
    Rejected { opcode: u16, status: u8 },

    #[error("malformed reply to 0x{opcode:04x} ({len} bytes)")]
    Malformed { opcode: u16, len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Event that ends a command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Command Complete carrying return parameters.
    Complete,
    /// Command Status; the procedure continues asynchronously.
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadScanEnable,
    WriteScanEnable(u8),
    ReadClassOfDevice,
    WriteClassOfDevice(DeviceClass),
    ReadLocalName,
    WriteLocalName(String),
    ReadLocalVersion,
    Inquiry {
        lap: u32,
        length: u8,
        num_responses: u8,
    },
    InquiryCancel,
    AuthenticationRequested {
        handle: u16,
    },
    DeleteStoredLinkKey {
        peer: Address,
    },
    ReadEncryptionKeySize {
        handle: u16,
    },
    Disconnect {
        handle: u16,
        reason: u8,
    },
}

impl Command {
    pub fn opcode(&self) -> u16 {
        match self {
            Self::ReadScanEnable => opcode(OGF_HOST_CTL, OCF_READ_SCAN_ENABLE),
            Self::WriteScanEnable(_) => opcode(OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE),
            Self::ReadClassOfDevice => opcode(OGF_HOST_CTL, OCF_READ_CLASS_OF_DEV),
            Self::WriteClassOfDevice(_) => opcode(OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEV),
            Self::ReadLocalName => opcode(OGF_HOST_CTL, OCF_READ_LOCAL_NAME),
            Self::WriteLocalName(_) => opcode(OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME),
            Self::DeleteStoredLinkKey { .. } => opcode(OGF_HOST_CTL, OCF_DELETE_STORED_LINK_KEY),
            Self::ReadLocalVersion => opcode(OGF_INFO_PARAM, OCF_READ_LOCAL_VERSION),
            Self::Inquiry { .. } => opcode(OGF_LINK_CTL, OCF_INQUIRY),
            Self::InquiryCancel => opcode(OGF_LINK_CTL, OCF_INQUIRY_CANCEL),
            Self::AuthenticationRequested { .. } => opcode(OGF_LINK_CTL, OCF_AUTH_REQUESTED),
            Self::Disconnect { .. } => opcode(OGF_LINK_CTL, OCF_DISCONNECT),
            Self::ReadEncryptionKeySize { .. } => {
                opcode(OGF_STATUS_PARAM, OCF_READ_ENCRYPTION_KEY_SIZE)
            }
        }
    }

    /// Command parameters as sent on the wire (little-endian).
    pub fn parameters(&self) -> Vec<u8> {
        match self {
            Self::WriteScanEnable(bits) => vec![*bits],
            Self::WriteClassOfDevice(class) => class.to_bytes().to_vec(),
            Self::WriteLocalName(name) => {
                let mut field = vec![0u8; NAME_LENGTH];
                let bytes = name.as_bytes();
                let len = bytes.len().min(NAME_LENGTH);
                field[..len].copy_from_slice(&bytes[..len]);
                field
            }
            Self::Inquiry {
                lap,
                length,
                num_responses,
            } => vec![
                *lap as u8,
                (*lap >> 8) as u8,
                (*lap >> 16) as u8,
                *length,
                *num_responses,
            ],
            Self::AuthenticationRequested { handle } | Self::ReadEncryptionKeySize { handle } => {
                handle.to_le_bytes().to_vec()
            }
            Self::DeleteStoredLinkKey { peer } => {
                let mut params = address_to_wire(peer).to_vec();
                params.push(0x00);
                params
            }
            Self::Disconnect { handle, reason } => {
                let mut params = handle.to_le_bytes().to_vec();
                params.push(*reason);
                params
            }
            Self::ReadScanEnable
            | Self::ReadClassOfDevice
            | Self::ReadLocalName
            | Self::ReadLocalVersion
            | Self::InquiryCancel => Vec::new(),
        }
    }

    pub fn completion(&self) -> Completion {
        match self {
            Self::Inquiry { .. } | Self::AuthenticationRequested { .. } | Self::Disconnect { .. } => {
                Completion::Status
            }
            _ => Completion::Complete,
        }
    }
}

/// Status byte plus return parameters of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub parameters: Vec<u8>,
}

impl Reply {
    pub fn ok(parameters: Vec<u8>) -> Self {
        Self {
            status: 0,
            parameters,
        }
    }

    pub fn status(status: u8) -> Self {
        Self {
            status,
            parameters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkType {
    Sco = 0x00,
    Acl = 0x01,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub handle: u16,
    pub peer: Address,
    pub link_type: LinkType,
}

/// Opens command sessions against managed adapters.
pub trait CommandChannel: Send + Sync {
    fn open(&self, adapter: &AdapterHandle) -> Result<Box<dyn ChannelSession>, ChannelError>;

    /// Index of the adapter that currently holds a `link_type` connection to
    /// `peer`, if any.
    fn locate_connection(
        &self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<u16>, ChannelError>;
}

/// An open session. Dropping it closes the channel.
pub trait ChannelSession {
    fn send(&mut self, command: &Command, timeout: Duration) -> Result<Reply, ChannelError>;

    fn connection_info(
        &mut self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<ConnectionInfo>, ChannelError>;

    /// Terminates a connection and waits for the disconnection to complete.
    fn disconnect(&mut self, handle: u16, reason: u8, timeout: Duration) -> Result<(), ChannelError>;
}

/// Addresses travel least significant byte first.
pub fn address_to_wire(address: &Address) -> [u8; 6] {
    let mut bytes = address.0;
    bytes.reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_combine_group_and_command() {
        assert_eq!(Command::WriteScanEnable(3).opcode(), 0x0c1a);
        assert_eq!(
            Command::Inquiry {
                lap: GIAC_LAP,
                length: INQUIRY_LENGTH,
                num_responses: 0
            }
            .opcode(),
            0x0401
        );
        assert_eq!(Command::ReadEncryptionKeySize { handle: 1 }.opcode(), 0x1408);
    }

    #[test]
    fn inquiry_parameters_carry_the_lap() {
        let command = Command::Inquiry {
            lap: GIAC_LAP,
            length: INQUIRY_LENGTH,
            num_responses: 0,
        };
        assert_eq!(command.parameters(), vec![0x33, 0x8b, 0x9e, 8, 0]);
        assert_eq!(command.completion(), Completion::Status);
    }

    #[test]
    fn local_name_is_padded() {
        let params = Command::WriteLocalName("desk".into()).parameters();
        assert_eq!(params.len(), NAME_LENGTH);
        assert_eq!(&params[..5], b"desk\0");
    }

    #[test]
    fn addresses_are_reversed_on_the_wire() {
        let address: Address = "00:11:22:33:44:55".parse().expect("address");
        let wire = address_to_wire(&address);
        assert_eq!(wire, [0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
    }
}
