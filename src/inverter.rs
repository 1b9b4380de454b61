//! Inverter registry
//!
//! One [`InverterLink`] per configured inverter: addressing, command queue,
//! pending device control and the per-exchange flags the radios report.

use heapless::{Deque, Vec};

use crate::config::{InverterConfig, INFO_QUEUE_DEPTH, MAX_NUM_INVERTERS, RF_CHANNELS};
use crate::radio::PollResult;
use crate::types::{DevControl, Generation, InfoCmd, InverterSerial, PowerLimit, RadioBackend};

/// Per-inverter link state
#[derive(Clone, Debug)]
pub struct InverterLink {
    index: u8,
    /// Static configuration
    pub config: InverterConfig,
    /// Heuristic TX channel index into the hopping table
    pub tx_channel: usize,
    /// Frames acknowledged by the inverter's radio
    pub ack_count: u32,
    /// Frames transmitted
    pub tx_count: u32,
    /// Day/night gate verdict
    pub comm_enabled: bool,
    /// At least one fragment arrived for the current request
    pub got_fragment: bool,
    /// The last fragment arrived for the current request
    pub got_last_msg: bool,
    /// Message id of the request in flight
    pub current_cmd: u8,
    /// The request in flight asks for a single frame
    pub single_frame: bool,
    /// Last requested power limit
    pub power_limit: Option<PowerLimit>,
    /// Epoch of the last valid frame
    pub last_rx_ts: u32,
    info_queue: Deque<InfoCmd, INFO_QUEUE_DEPTH>,
    pending_control: Option<DevControl>,
}

impl InverterLink {
    /// Create a link for a configured inverter
    #[must_use]
    pub fn new(index: u8, config: InverterConfig) -> Self {
        Self {
            index,
            config,
            tx_channel: 0,
            ack_count: 0,
            tx_count: 0,
            comm_enabled: true,
            got_fragment: false,
            got_last_msg: false,
            current_cmd: 0,
            single_frame: false,
            power_limit: None,
            last_rx_ts: 0,
            info_queue: Deque::new(),
            pending_control: None,
        }
    }

    /// Registry index
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Serial number
    #[must_use]
    pub const fn serial(&self) -> InverterSerial {
        self.config.serial
    }

    /// Wire address bytes
    #[must_use]
    pub const fn address(&self) -> [u8; 4] {
        self.config.serial.address_bytes()
    }

    /// Command dialect
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.config.generation
    }

    /// Radio front-end
    #[must_use]
    pub const fn backend(&self) -> RadioBackend {
        self.config.backend
    }

    /// Rated power, None when unknown
    #[must_use]
    pub const fn rated_power(&self) -> Option<u16> {
        match self.config.rated_power_w {
            0 => None,
            w => Some(w),
        }
    }

    /// Queue an info request, ignoring duplicates. Returns false when full.
    pub fn enqueue_command(&mut self, cmd: InfoCmd) -> bool {
        if self.info_queue.iter().any(|c| *c == cmd) {
            return true;
        }
        self.info_queue.push_back(cmd).is_ok()
    }

    /// Next info request, the generation default when nothing is queued
    #[must_use]
    pub fn queued_cmd(&self) -> InfoCmd {
        self.info_queue
            .front()
            .copied()
            .unwrap_or(InfoCmd::default_for(self.config.generation))
    }

    /// Drop the request at the queue head
    pub fn finish_queued_cmd(&mut self) {
        self.info_queue.pop_front();
    }

    /// Number of queued info requests
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.info_queue.len()
    }

    /// Request a device control command on the next send slot
    pub fn set_device_control(&mut self, ctrl: DevControl) {
        if let DevControl::ActivePowerLimit(limit) = ctrl {
            self.power_limit = Some(limit);
        }
        self.pending_control = Some(ctrl);
    }

    /// Pending device control, if any
    #[must_use]
    pub const fn pending_control(&self) -> Option<DevControl> {
        self.pending_control
    }

    /// Take the pending device control
    pub fn take_device_control(&mut self) -> Option<DevControl> {
        self.pending_control.take()
    }

    /// Reset per-request flags before a transmission
    pub fn begin_request(&mut self, message_id: u8, single_frame: bool) {
        self.current_cmd = message_id;
        self.single_frame = single_frame;
        self.got_fragment = false;
        self.got_last_msg = false;
    }

    /// Fold a radio poll result into the link
    pub fn apply(&mut self, result: &PollResult) {
        if result.acked {
            self.ack_count = self.ack_count.wrapping_add(1);
        }
        if result.got_fragment {
            self.got_fragment = true;
        }
        if result.got_last {
            self.got_last_msg = true;
        }
    }

    /// Move the heuristic TX channel to the next table entry
    pub fn rotate_tx_channel(&mut self) {
        self.tx_channel = (self.tx_channel + 1) % RF_CHANNELS;
    }
}

/// Registry errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// No free slot
    Full,
    /// Serial already registered
    Duplicate,
}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "inverter registry full"),
            Self::Duplicate => write!(f, "inverter already registered"),
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for RegistryError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Full => defmt::write!(f, "Full"),
            Self::Duplicate => defmt::write!(f, "Duplicate"),
        }
    }
}

/// Fixed capacity set of inverter links
#[derive(Clone, Debug, Default)]
pub struct Inverters {
    links: Vec<InverterLink, MAX_NUM_INVERTERS>,
}

impl Inverters {
    /// Create an empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self { links: Vec::new() }
    }

    /// Register an inverter, returning its index
    ///
    /// # Errors
    ///
    /// Returns an error when the registry is full or the serial is known.
    pub fn add(&mut self, config: InverterConfig) -> Result<u8, RegistryError> {
        if self.links.iter().any(|l| l.serial() == config.serial) {
            return Err(RegistryError::Duplicate);
        }
        let index = self.links.len() as u8;
        self.links
            .push(InverterLink::new(index, config))
            .map_err(|_| RegistryError::Full)?;
        Ok(index)
    }

    /// Link by index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&InverterLink> {
        self.links.get(index)
    }

    /// Mutable link by index
    pub fn get_mut(&mut self, index: usize) -> Option<&mut InverterLink> {
        self.links.get_mut(index)
    }

    /// Index of the inverter owning a wire address
    #[must_use]
    pub fn find_by_address(&self, address: &[u8; 4]) -> Option<usize> {
        self.links.iter().position(|l| l.address() == *address)
    }

    /// Iterate links
    pub fn iter(&self) -> impl Iterator<Item = &InverterLink> {
        self.links.iter()
    }

    /// Iterate links mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InverterLink> {
        self.links.iter_mut()
    }

    /// Number of registered inverters
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check for an empty registry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
