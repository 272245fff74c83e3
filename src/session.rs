// Per-adapter session: identity, scan-mode cache, discoverable timeout and
// discovery ownership

use bluer::Address;

use crate::error::AdapterError;

pub const SCAN_DISABLED: u8 = 0x00;
pub const SCAN_INQUIRY: u8 = 0x01;
pub const SCAN_PAGE: u8 = 0x02;

/// Identifies one local controller while it is up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterHandle {
    index: u16,
    address: Address,
}

impl AdapterHandle {
    pub fn new(index: u16, address: Address) -> Self {
        Self { index, address }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Kernel name, `hci<index>`.
    pub fn name(&self) -> String {
        format!("hci{}", self.index)
    }

    /// Object path requests use to address this adapter.
    pub fn path(&self) -> String {
        format!("/org/bluez/hci{}", self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Off,
    Connectable,
    Discoverable,
    Unknown,
}

impl ScanMode {
    /// Interprets the controller's scan-enable bits. Inquiry scan without page
    /// scan is reserved and reported as `Unknown`.
    pub fn from_scan_enable(bits: u8) -> Self {
        match bits {
            SCAN_DISABLED => Self::Off,
            SCAN_PAGE => Self::Connectable,
            bits if bits == SCAN_PAGE | SCAN_INQUIRY => Self::Discoverable,
            _ => Self::Unknown,
        }
    }

    /// Parses a settable mode label (case-insensitive).
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "connectable" => Some(Self::Connectable),
            "discoverable" => Some(Self::Discoverable),
            _ => None,
        }
    }

    pub fn scan_enable(self) -> Option<u8> {
        match self {
            Self::Off => Some(SCAN_DISABLED),
            Self::Connectable => Some(SCAN_PAGE),
            Self::Discoverable => Some(SCAN_PAGE | SCAN_INQUIRY),
            Self::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Connectable => "connectable",
            Self::Discoverable => "discoverable",
            Self::Unknown => "unknown",
        }
    }
}

/// Discovery ownership. At most one caller owns an inquiry at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Discovery {
    #[default]
    Idle,
    Discovering { owner: String },
}

impl Discovery {
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Discovering { owner } => Some(owner),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Discovering { .. })
    }

    pub fn ensure_idle(&self) -> Result<(), AdapterError> {
        if self.is_active() {
            return Err(AdapterError::DiscoveryAlreadyInProgress);
        }
        Ok(())
    }

    /// Only the caller that started the inquiry may cancel it.
    pub fn authorize_cancel(&self, caller: &str) -> Result<(), AdapterError> {
        match self.owner() {
            Some(owner) if owner == caller => Ok(()),
            _ => Err(AdapterError::NotAuthorized),
        }
    }

    pub fn begin(&mut self, owner: impl Into<String>) {
        *self = Self::Discovering {
            owner: owner.into(),
        };
    }

    /// Returns to `Idle`, handing back the previous owner.
    pub fn finish(&mut self) -> Option<String> {
        match std::mem::take(self) {
            Self::Idle => None,
            Self::Discovering { owner } => Some(owner),
        }
    }
}

/// Mutable per-adapter fields. Only the adapter's worker touches them.
#[derive(Debug, Clone)]
pub struct SessionState {
    scan_enable: u8,
    discoverable_timeout: u32,
    discovery: Discovery,
}

impl SessionState {
    pub fn new(discoverable_timeout: u32) -> Self {
        Self {
            scan_enable: SCAN_DISABLED,
            discoverable_timeout,
            discovery: Discovery::Idle,
        }
    }

    pub fn scan_enable(&self) -> u8 {
        self.scan_enable
    }

    pub fn set_scan_enable(&mut self, bits: u8) {
        self.scan_enable = bits;
    }

    pub fn scan_mode(&self) -> ScanMode {
        ScanMode::from_scan_enable(self.scan_enable)
    }

    pub fn is_connectable(&self) -> bool {
        self.scan_enable & SCAN_PAGE != 0
    }

    pub fn is_discoverable(&self) -> bool {
        self.scan_enable & SCAN_INQUIRY != 0
    }

    pub fn discoverable_timeout(&self) -> u32 {
        self.discoverable_timeout
    }

    pub fn set_discoverable_timeout(&mut self, seconds: u32) {
        self.discoverable_timeout = seconds;
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn discovery_mut(&mut self) -> &mut Discovery {
        &mut self.discovery
    }
}

/// One managed adapter: its identity, its state and whether it is up.
#[derive(Debug, Clone)]
pub struct AdapterSession {
    handle: AdapterHandle,
    state: SessionState,
    up: bool,
}

impl AdapterSession {
    pub fn new(handle: AdapterHandle, discoverable_timeout: u32) -> Self {
        Self {
            handle,
            state: SessionState::new(discoverable_timeout),
            up: true,
        }
    }

    pub fn handle(&self) -> &AdapterHandle {
        &self.handle
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Borrows identity and state at once, for handler contexts.
    pub fn parts_mut(&mut self) -> (&AdapterHandle, &mut SessionState) {
        (&self.handle, &mut self.state)
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn set_up(&mut self, up: bool) {
        self.up = up;
    }
}
