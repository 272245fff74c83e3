// Request handlers for the adapter interface
//
// Every handler has the same shape: it gets the per-adapter context and the
// already signature-checked arguments, and returns the reply values or one
// typed error.

pub mod bonding;
pub mod discovery;
pub mod local;
pub mod mode;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::class::DeviceClass;
use crate::error::{AdapterError, Fault};
use crate::events::{AdapterEvent, EventSink};
use crate::hci::{ChannelSession, Command, CommandChannel, READ_TIMEOUT};
use crate::ident::OuiDatabase;
use crate::message::Value;
use crate::session::{AdapterHandle, SessionState};
use crate::store::{AttributeStore, Category, Scope};

pub type HandlerResult = Result<Vec<Value>, AdapterError>;

pub type Handler = fn(&mut Context<'_>, &[Value]) -> HandlerResult;

/// Collaborators shared by every adapter.
#[derive(Clone)]
pub struct Services {
    pub channel: Arc<dyn CommandChannel>,
    pub store: Arc<dyn AttributeStore>,
    pub events: Arc<dyn EventSink>,
    pub oui: Arc<OuiDatabase>,
}

/// What one handler invocation may see and touch.
pub struct Context<'a> {
    pub adapter: &'a AdapterHandle,
    pub state: &'a mut SessionState,
    pub services: &'a Services,
    /// Identity of the remote caller.
    pub caller: &'a str,
}

impl Context<'_> {
    /// Opens a command session; the channel closes when it is dropped.
    pub fn open(&self) -> Result<Box<dyn ChannelSession>, AdapterError> {
        self.services.channel.open(self.adapter).map_err(|e| {
            error!("Can't open {}: {e}", self.adapter.name());
            AdapterError::NoSuchAdapter {
                index: self.adapter.index(),
            }
        })
    }

    /// Sends `command` and returns its return parameters. A non-zero status
    /// is a failure.
    pub fn exec(
        &self,
        session: &mut dyn ChannelSession,
        command: &Command,
        timeout: Duration,
    ) -> Result<Vec<u8>, AdapterError> {
        let reply = session.send(command, timeout).map_err(|e| {
            error!(
                "Sending command 0x{:04x} to {} failed: {e}",
                command.opcode(),
                self.adapter.name()
            );
            AdapterError::from(e)
        })?;

        if reply.status != 0 {
            error!(
                "Command 0x{:04x} on {} failed with status 0x{:02x}",
                command.opcode(),
                self.adapter.name(),
                reply.status
            );
            return Err(AdapterError::status(reply.status));
        }
        Ok(reply.parameters)
    }

    pub fn read_class(&self, session: &mut dyn ChannelSession) -> Result<DeviceClass, AdapterError> {
        let params = self.exec(session, &Command::ReadClassOfDevice, READ_TIMEOUT)?;
        let bytes: [u8; 3] = params
            .get(..3)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| malformed(&Command::ReadClassOfDevice, params.len()))?;
        Ok(DeviceClass::from_bytes(bytes))
    }

    /// Store scope of this adapter for `category`.
    pub fn scope(&self, category: Category) -> Scope {
        Scope::new(self.adapter.address(), category)
    }

    pub fn emit(&self, event: AdapterEvent) {
        self.services.events.emit(self.adapter, event);
    }
}

pub(crate) fn malformed(command: &Command, len: usize) -> AdapterError {
    AdapterError::HardwareCommandFailed(Fault::Channel(format!(
        "malformed reply to 0x{:04x} ({len} bytes)",
        command.opcode()
    )))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use bluer::Address;

    use super::*;
    use crate::events::RecordingSink;
    use crate::hci::SimulatedController;
    use crate::session::AdapterSession;
    use crate::store::MemoryStore;

    pub const LOCAL: &str = "00:1A:7D:DA:71:13";
    pub const PEER: &str = "00:0A:95:9D:68:16";

    pub struct Fixture {
        pub controller: SimulatedController,
        pub store: Arc<MemoryStore>,
        pub events: Arc<RecordingSink>,
        pub services: Services,
        pub session: AdapterSession,
    }

    impl Fixture {
        pub fn new() -> Self {
            let address: Address = LOCAL.parse().expect("address");
            let handle = AdapterHandle::new(0, address);
            let controller = SimulatedController::new();
            controller.add_adapter(&handle);

            let store = Arc::new(MemoryStore::new());
            let events = Arc::new(RecordingSink::new());
            let services = Services {
                channel: Arc::new(controller.clone()),
                store: store.clone(),
                events: events.clone(),
                oui: Arc::new(OuiDatabase::parse(
                    "000A95     (base 16)\t\tApple Computer, Inc.\n\
                     001A7D     (base 16)\t\tcyber-blue(HK)Ltd\n",
                )),
            };

            Self {
                controller,
                store,
                events,
                services,
                session: AdapterSession::new(handle, 180),
            }
        }

        pub fn peer() -> Address {
            PEER.parse().expect("address")
        }

        pub fn call(&mut self, caller: &str, handler: Handler, args: &[Value]) -> HandlerResult {
            let (adapter, state) = self.session.parts_mut();
            let mut context = Context {
                adapter,
                state,
                services: &self.services,
                caller,
            };
            handler(&mut context, args)
        }

        pub fn scope(&self, category: Category) -> Scope {
            Scope::new(self.session.handle().address(), category)
        }

        /// Commands the simulated controller has seen with this opcode.
        pub fn sent(&self, opcode: u16) -> Vec<Command> {
            self.controller
                .sent(0)
                .into_iter()
                .filter(|command| command.opcode() == opcode)
                .collect()
        }
    }
}
