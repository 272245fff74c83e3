// In-process controller model
//
// Answers the command set the handlers use, keeps a log of sent commands and
// can be told to fail specific opcodes. Backs the `simulated` backend and
// the handler tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluer::Address;
use parking_lot::Mutex;

use super::{
    ChannelError, ChannelSession, Command, CommandChannel, ConnectionInfo,
    LinkType, Reply, NAME_LENGTH,
};
use crate::class::DeviceClass;
use crate::session::AdapterHandle;

const STATUS_UNKNOWN_CONNECTION: u8 = 0x02;
const STATUS_COMMAND_DISALLOWED: u8 = 0x0c;

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub scan_enable: u8,
    pub class: DeviceClass,
    pub name: String,
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer: u16,
    pub lmp_subversion: u16,
    pub connections: Vec<ConnectionInfo>,
    pub encryption_key_size: u8,
    pub inquiry_active: bool,
    /// Reachable by `open`; `false` models a controller that went away.
    pub available: bool,
    /// Opcodes answered with this status instead of executing.
    pub rejected: HashMap<u16, u8>,
    /// Opcodes that fail at the transport level.
    pub broken: Vec<u16>,
    pub sent: Vec<Command>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            scan_enable: 0,
            class: DeviceClass::new(0x00_0100),
            name: String::new(),
            hci_version: 3,
            hci_revision: 0x0c5c,
            lmp_version: 3,
            manufacturer: 10,
            lmp_subversion: 0x0c5c,
            connections: Vec::new(),
            encryption_key_size: 16,
            inquiry_active: false,
            available: true,
            rejected: HashMap::new(),
            broken: Vec::new(),
            sent: Vec::new(),
        }
    }

    fn execute(&mut self, command: &Command) -> Result<Reply, ChannelError> {
        let opcode = command.opcode();
        self.sent.push(command.clone());

        if self.broken.contains(&opcode) {
            return Err(ChannelError::Timeout { opcode });
        }
        if let Some(&status) = self.rejected.get(&opcode) {
            return Ok(Reply::status(status));
        }

        let reply = match command {
            Command::ReadScanEnable => Reply::ok(vec![self.scan_enable]),
            Command::WriteScanEnable(bits) => {
                self.scan_enable = *bits;
                Reply::ok(Vec::new())
            }
            Command::ReadClassOfDevice => Reply::ok(self.class.to_bytes().to_vec()),
            Command::WriteClassOfDevice(class) => {
                self.class = *class;
                Reply::ok(Vec::new())
            }
            Command::ReadLocalName => {
                let mut field = vec![0u8; NAME_LENGTH];
                let bytes = self.name.as_bytes();
                let len = bytes.len().min(NAME_LENGTH);
                field[..len].copy_from_slice(&bytes[..len]);
                Reply::ok(field)
            }
            Command::WriteLocalName(name) => {
                self.name = name.clone();
                Reply::ok(Vec::new())
            }
            Command::ReadLocalVersion => {
                let mut params = vec![self.hci_version];
                params.extend_from_slice(&self.hci_revision.to_le_bytes());
                params.push(self.lmp_version);
                params.extend_from_slice(&self.manufacturer.to_le_bytes());
                params.extend_from_slice(&self.lmp_subversion.to_le_bytes());
                Reply::ok(params)
            }
            Command::Inquiry { .. } => {
                self.inquiry_active = true;
                Reply::status(0)
            }
            Command::InquiryCancel => {
                if !self.inquiry_active {
                    return Ok(Reply::status(STATUS_COMMAND_DISALLOWED));
                }
                self.inquiry_active = false;
                Reply::ok(Vec::new())
            }
            Command::AuthenticationRequested { handle } => {
                if self.connection(*handle).is_some() {
                    Reply::status(0)
                } else {
                    Reply::status(STATUS_UNKNOWN_CONNECTION)
                }
            }
            Command::DeleteStoredLinkKey { .. } => Reply::ok(vec![0x00, 0x00]),
            Command::ReadEncryptionKeySize { handle } => {
                if self.connection(*handle).is_none() {
                    return Ok(Reply::status(STATUS_UNKNOWN_CONNECTION));
                }
                let mut params = handle.to_le_bytes().to_vec();
                params.push(self.encryption_key_size);
                Reply::ok(params)
            }
            Command::Disconnect { handle, .. } => {
                if self.connection(*handle).is_none() {
                    return Ok(Reply::status(STATUS_UNKNOWN_CONNECTION));
                }
                self.connections.retain(|conn| conn.handle != *handle);
                Reply::status(0)
            }
        };
        Ok(reply)
    }

    fn connection(&self, handle: u16) -> Option<&ConnectionInfo> {
        self.connections.iter().find(|conn| conn.handle == handle)
    }

    fn find(&self, peer: &Address, link_type: LinkType) -> Option<&ConnectionInfo> {
        self.connections
            .iter()
            .find(|conn| conn.peer == *peer && conn.link_type == link_type)
    }
}

/// Shared model of every simulated controller. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    adapters: Arc<Mutex<HashMap<u16, ControllerState>>>,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_adapter(&self, handle: &AdapterHandle) {
        self.adapters
            .lock()
            .insert(handle.index(), ControllerState::new());
    }

    /// Runs `f` against the state of adapter `index`, if it is simulated.
    pub fn with_state<R>(
        &self,
        index: u16,
        f: impl FnOnce(&mut ControllerState) -> R,
    ) -> Option<R> {
        self.adapters.lock().get_mut(&index).map(f)
    }

    pub fn add_connection(&self, index: u16, peer: Address, handle: u16) {
        self.with_state(index, |state| {
            state.connections.push(ConnectionInfo {
                handle,
                peer,
                link_type: LinkType::Acl,
            })
        });
    }

    pub fn reject(&self, index: u16, opcode: u16, status: u8) {
        self.with_state(index, |state| {
            state.rejected.insert(opcode, status);
        });
    }

    pub fn break_opcode(&self, index: u16, opcode: u16) {
        self.with_state(index, |state| state.broken.push(opcode));
    }

    pub fn set_available(&self, index: u16, available: bool) {
        self.with_state(index, |state| state.available = available);
    }

    pub fn sent(&self, index: u16) -> Vec<Command> {
        self.with_state(index, |state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Ends a running inquiry the way a controller does when its inquiry
    /// length runs out.
    pub fn finish_inquiry(&self, index: u16) {
        self.with_state(index, |state| state.inquiry_active = false);
    }
}

impl CommandChannel for SimulatedController {
    fn open(&self, adapter: &AdapterHandle) -> Result<Box<dyn ChannelSession>, ChannelError> {
        let index = adapter.index();
        let available = self
            .adapters
            .lock()
            .get(&index)
            .is_some_and(|state| state.available);
        if !available {
            return Err(ChannelError::Open {
                index,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        Ok(Box::new(SimulatedSession {
            adapters: Arc::clone(&self.adapters),
            index,
        }))
    }

    fn locate_connection(
        &self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<u16>, ChannelError> {
        let adapters = self.adapters.lock();
        let mut indexes: Vec<u16> = adapters.keys().copied().collect();
        indexes.sort_unstable();
        Ok(indexes
            .into_iter()
            .find(|index| adapters[index].find(peer, link_type).is_some()))
    }
}

struct SimulatedSession {
    adapters: Arc<Mutex<HashMap<u16, ControllerState>>>,
    index: u16,
}

impl SimulatedSession {
    fn state<R>(&self, f: impl FnOnce(&mut ControllerState) -> R) -> Result<R, ChannelError> {
        let mut adapters = self.adapters.lock();
        match adapters.get_mut(&self.index) {
            Some(state) if state.available => Ok(f(state)),
            _ => Err(ChannelError::Io(std::io::Error::from(
                std::io::ErrorKind::NotConnected,
            ))),
        }
    }
}

impl ChannelSession for SimulatedSession {
    fn send(&mut self, command: &Command, _timeout: Duration) -> Result<Reply, ChannelError> {
        self.state(|state| state.execute(command))?
    }

    fn connection_info(
        &mut self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<ConnectionInfo>, ChannelError> {
        self.state(|state| state.find(peer, link_type).cloned())
    }

    fn disconnect(&mut self, handle: u16, reason: u8, _timeout: Duration) -> Result<(), ChannelError> {
        let command = Command::Disconnect { handle, reason };
        let opcode = command.opcode();
        let reply = self.state(|state| state.execute(&command))??;
        if reply.status != 0 {
            return Err(ChannelError::Rejected {
                opcode,
                status: reply.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::SHORT_TIMEOUT;

    fn handle(index: u16) -> AdapterHandle {
        AdapterHandle::new(index, Address::new([0, 0x1a, 0x7d, 0xda, 0x71, index as u8]))
    }

    #[test]
    fn executes_and_logs_commands() {
        let controller = SimulatedController::new();
        controller.add_adapter(&handle(0));

        let mut session = controller.open(&handle(0)).expect("open");
        let reply = session
            .send(&Command::WriteScanEnable(0x03), SHORT_TIMEOUT)
            .expect("send");
        assert_eq!(reply.status, 0);

        let reply = session
            .send(&Command::ReadScanEnable, SHORT_TIMEOUT)
            .expect("send");
        assert_eq!(reply.parameters, vec![0x03]);
        assert_eq!(controller.sent(0).len(), 2);
    }

    #[test]
    fn unavailable_adapters_refuse_to_open() {
        let controller = SimulatedController::new();
        controller.add_adapter(&handle(0));
        controller.set_available(0, false);

        assert!(matches!(
            controller.open(&handle(0)),
            Err(ChannelError::Open { index: 0, .. })
        ));
        assert!(controller.open(&handle(5)).is_err());
    }

    #[test]
    fn locates_connections_on_the_owning_adapter() {
        let controller = SimulatedController::new();
        controller.add_adapter(&handle(0));
        controller.add_adapter(&handle(1));
        let peer: Address = "00:0A:95:9D:68:16".parse().expect("address");
        controller.add_connection(1, peer, 0x002a);

        let located = controller
            .locate_connection(&peer, LinkType::Acl)
            .expect("locate");
        assert_eq!(located, Some(1));
        assert_eq!(
            controller
                .locate_connection(&peer, LinkType::Sco)
                .expect("locate"),
            None
        );
    }
}
