// Raw HCI socket channel (Linux AF_BLUETOOTH)

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bluer::Address;
use log::{debug, error, warn};
use socket2::{Domain, Protocol, Socket, Type};

use super::{
    address_to_wire, ChannelError, ChannelSession, Command, CommandChannel, Completion,
    ConnectionInfo, LinkType, Reply,
};
use crate::session::AdapterHandle;

const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

const EVT_INQUIRY_COMPLETE: u8 = 0x01;
const EVT_DISCONN_COMPLETE: u8 = 0x05;
const EVT_CMD_COMPLETE: u8 = 0x0e;
const EVT_CMD_STATUS: u8 = 0x0f;

// _IOR('H', 213, int)
const HCIGETCONNINFO: u64 = 0x8004_48d5;

const MONITOR_POLL: Duration = Duration::from_secs(1);

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

// Kernel layout; only the handle is read back.
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct RawConnInfo {
    handle: u16,
    bdaddr: [u8; 6],
    link_type: u8,
    out: u8,
    state: u16,
    link_mode: u32,
}

#[repr(C)]
#[derive(Default)]
struct ConnInfoRequest {
    bdaddr: [u8; 6],
    link_type: u8,
    conn_info: RawConnInfo,
}

/// A raw HCI socket bound to one controller. Closed on drop.
pub struct HciSocket {
    socket: Socket,
    index: u16,
}

impl HciSocket {
    pub fn open(index: u16) -> Result<Self, ChannelError> {
        let open_error = |source| ChannelError::Open { index, source };

        let socket = Socket::new(
            Domain::from(AF_BLUETOOTH),
            Type::RAW,
            Some(Protocol::from(BTPROTO_HCI)),
        )
        .map_err(open_error)?;

        bind_hci(&socket, index).map_err(open_error)?;
        set_filter(
            &socket,
            &HciFilter {
                type_mask: 1 << HCI_EVENT_PKT,
                event_mask: [u32::MAX, u32::MAX],
                opcode: 0,
            },
        )
        .map_err(open_error)?;

        Ok(Self { socket, index })
    }

    fn write_command(&mut self, opcode: u16, params: &[u8]) -> Result<(), ChannelError> {
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);
        (&self.socket).write_all(&packet)?;
        Ok(())
    }

    /// Reads the next event as `(code, parameters)`. `None` once `deadline`
    /// has passed.
    fn read_event(&mut self, deadline: Instant) -> Result<Option<(u8, Vec<u8>)>, ChannelError> {
        let mut buf = [0u8; 260];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let len = match (&self.socket).read(&mut buf) {
                Ok(len) => len,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if len < 3 || buf[0] != HCI_EVENT_PKT {
                continue;
            }
            let end = (3 + usize::from(buf[2])).min(len);
            return Ok(Some((buf[1], buf[3..end].to_vec())));
        }
    }
}

impl ChannelSession for HciSocket {
    fn send(&mut self, command: &Command, timeout: Duration) -> Result<Reply, ChannelError> {
        let opcode = command.opcode();
        let deadline = Instant::now() + timeout;
        self.write_command(opcode, &command.parameters())?;

        while let Some((event, params)) = self.read_event(deadline)? {
            match event {
                EVT_CMD_COMPLETE if params.len() >= 3 => {
                    if u16::from_le_bytes([params[1], params[2]]) != opcode {
                        continue;
                    }
                    let Some((&status, rest)) = params[3..].split_first() else {
                        return Err(ChannelError::Malformed {
                            opcode,
                            len: params.len(),
                        });
                    };
                    return Ok(Reply {
                        status,
                        parameters: rest.to_vec(),
                    });
                }
                EVT_CMD_STATUS if params.len() >= 4 => {
                    if u16::from_le_bytes([params[2], params[3]]) != opcode {
                        continue;
                    }
                    let status = params[0];
                    // A successful status only ends exchanges that never get a
                    // Command Complete.
                    if command.completion() == Completion::Status || status != 0 {
                        return Ok(Reply::status(status));
                    }
                }
                _ => {}
            }
        }

        Err(ChannelError::Timeout { opcode })
    }

    fn connection_info(
        &mut self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<ConnectionInfo>, ChannelError> {
        let mut request = ConnInfoRequest {
            bdaddr: address_to_wire(peer),
            link_type: link_type as u8,
            ..ConnInfoRequest::default()
        };

        // SAFETY: the request is a properly laid out hci_conn_info_req with
        // room for one hci_conn_info, and the fd is a bound HCI socket.
        let ret = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                HCIGETCONNINFO as _,
                &mut request as *mut ConnInfoRequest as *mut libc::c_void,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(None);
            }
            return Err(err.into());
        }

        Ok(Some(ConnectionInfo {
            handle: request.conn_info.handle,
            peer: *peer,
            link_type,
        }))
    }

    fn disconnect(&mut self, handle: u16, reason: u8, timeout: Duration) -> Result<(), ChannelError> {
        let command = Command::Disconnect { handle, reason };
        let opcode = command.opcode();
        let deadline = Instant::now() + timeout;

        let reply = self.send(&command, timeout)?;
        if reply.status != 0 {
            return Err(ChannelError::Rejected {
                opcode,
                status: reply.status,
            });
        }

        while let Some((event, params)) = self.read_event(deadline)? {
            if event != EVT_DISCONN_COMPLETE || params.len() < 4 {
                continue;
            }
            if u16::from_le_bytes([params[1], params[2]]) != handle {
                continue;
            }
            if params[0] != 0 {
                return Err(ChannelError::Rejected {
                    opcode,
                    status: params[0],
                });
            }
            return Ok(());
        }

        Err(ChannelError::Timeout { opcode })
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        debug!("Closing channel to hci{}", self.index);
    }
}

/// Command channel over raw HCI sockets for a fixed set of controllers.
#[derive(Debug, Clone)]
pub struct RawHciChannel {
    indexes: Vec<u16>,
}

impl RawHciChannel {
    pub fn new(indexes: Vec<u16>) -> Self {
        Self { indexes }
    }
}

impl CommandChannel for RawHciChannel {
    fn open(&self, adapter: &AdapterHandle) -> Result<Box<dyn ChannelSession>, ChannelError> {
        Ok(Box::new(HciSocket::open(adapter.index())?))
    }

    fn locate_connection(
        &self,
        peer: &Address,
        link_type: LinkType,
    ) -> Result<Option<u16>, ChannelError> {
        for &index in &self.indexes {
            let mut socket = match HciSocket::open(index) {
                Ok(socket) => socket,
                Err(e) => {
                    debug!("Skipping hci{index} while looking for {peer}: {e}");
                    continue;
                }
            };
            if socket.connection_info(peer, link_type)?.is_some() {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

/// Watches one controller for Inquiry Complete events on a background thread.
/// The thread stops when `on_complete` returns `false` or the socket fails.
pub fn watch_inquiry_complete<F>(index: u16, mut on_complete: F) -> Result<JoinHandle<()>, ChannelError>
where
    F: FnMut() -> bool + Send + 'static,
{
    let mut socket = HciSocket::open(index)?;

    let handle = thread::Builder::new()
        .name(format!("hci{index}-inquiry"))
        .spawn(move || loop {
            match socket.read_event(Instant::now() + MONITOR_POLL) {
                Ok(Some((EVT_INQUIRY_COMPLETE, params))) => {
                    debug!("Inquiry complete on hci{index} (status {:?})", params.first());
                    if !on_complete() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Inquiry monitor for hci{index} stopped: {e}");
                    break;
                }
            }
        })
        .map_err(ChannelError::Io)?;

    Ok(handle)
}

fn bind_hci(socket: &Socket, index: u16) -> io::Result<()> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: index,
        hci_channel: HCI_CHANNEL_RAW,
    };
    // SAFETY: bind() with a valid fd and a properly sized sockaddr_hci
    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const SockaddrHci as *const libc::sockaddr,
            std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_filter(socket: &Socket, filter: &HciFilter) -> io::Result<()> {
    // SAFETY: setsockopt with a valid fd and a properly sized hci_filter
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            filter as *const HciFilter as *const libc::c_void,
            std::mem::size_of::<HciFilter>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        warn!("Can't set HCI filter: {err}");
        return Err(err);
    }
    Ok(())
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
