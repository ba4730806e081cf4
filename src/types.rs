//! Types for radio configuration and tag operations

use crate::bits::BitField;
use crate::registers::fields::mac_ver;

/// ISO 18000-6C memory bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryBank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

impl MemoryBank {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x03 {
            0 => MemoryBank::Reserved,
            1 => MemoryBank::Epc,
            2 => MemoryBank::Tid,
            _ => MemoryBank::User,
        }
    }
}

/// Select command target (session flag or SL)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectTarget {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
    Sl = 4,
}

impl SelectTarget {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits {
            1 => SelectTarget::S1,
            2 => SelectTarget::S2,
            3 => SelectTarget::S3,
            4 => SelectTarget::Sl,
            _ => SelectTarget::S0,
        }
    }
}

/// Select command action (what matching and non-matching tags do)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectAction {
    Action0 = 0,
    Action1 = 1,
    Action2 = 2,
    Action3 = 3,
    Action4 = 4,
    Action5 = 5,
    Action6 = 6,
    Action7 = 7,
}

impl SelectAction {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0x07 {
            0 => SelectAction::Action0,
            1 => SelectAction::Action1,
            2 => SelectAction::Action2,
            3 => SelectAction::Action3,
            4 => SelectAction::Action4,
            5 => SelectAction::Action5,
            6 => SelectAction::Action6,
            _ => SelectAction::Action7,
        }
    }
}

/// One tag-mask descriptor used to build a Select command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectCriterion {
    pub bank: MemoryBank,
    /// Bit offset of the mask within the bank
    pub offset: u32,
    /// Mask length in bits (at most 255)
    pub count: u8,
    /// Mask bytes, most significant bit first; at most 32 bytes
    pub mask: Vec<u8>,
    pub target: SelectTarget,
    pub action: SelectAction,
    pub truncate: bool,
}

/// EPC match applied after singulation, before a tag is reported or accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMatchCriteria {
    /// Report tags that do NOT match the mask
    pub match_on_mismatch: bool,
    /// Bit offset into the EPC
    pub offset: u16,
    /// Mask length in bits
    pub count: u16,
    pub mask: Vec<u8>,
}

/// Query target flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryTarget {
    A = 0,
    B = 1,
}

/// Query session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QuerySession {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
}

/// Which tags respond to Query, based on their SL flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QuerySel {
    All = 0,
    NotSl = 2,
    Sl = 3,
}

/// EPC Gen2 Query parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    pub target: QueryTarget,
    pub session: QuerySession,
    pub sel: QuerySel,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            target: QueryTarget::A,
            session: QuerySession::S0,
            sel: QuerySel::All,
        }
    }
}

/// Singulation (anti-collision) algorithm and its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingulationAlgorithm {
    FixedQ {
        q: u8,
        retry_count: u8,
        toggle_target: bool,
        repeat_until_no_tags: bool,
    },
    DynamicQ {
        start_q: u8,
        min_q: u8,
        max_q: u8,
        threshold_multiplier: u8,
        retry_count: u8,
        toggle_target: bool,
    },
}

impl SingulationAlgorithm {
    pub(crate) const FIXED_Q: u32 = 0;
    pub(crate) const DYNAMIC_Q: u32 = 3;

    pub(crate) fn code(&self) -> u32 {
        match self {
            SingulationAlgorithm::FixedQ { .. } => Self::FIXED_Q,
            SingulationAlgorithm::DynamicQ { .. } => Self::DYNAMIC_Q,
        }
    }
}

/// Whether tag operations run once or until cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Continuous,
    NonContinuous,
}

/// Radio power management state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    Full = 0,
    Standby = 1,
}

/// Logical antenna port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaPortConfig {
    /// Transmit power in tenths of dBm
    pub power: u16,
    /// Milliseconds to stay on this port per cycle, zero for no limit
    pub dwell_time_ms: u32,
    /// Inventory rounds per cycle, zero for no limit
    pub inventory_cycles: u32,
    pub physical_tx_port: u8,
    pub physical_rx_port: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AntennaPortStatus {
    pub enabled: bool,
    /// Most recent antenna sense reading
    pub sense_value: u32,
}

/// Read-only description of a link profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkProfileInfo {
    pub enabled: bool,
    pub profile_id: u64,
    pub profile_version: u32,
    pub protocol: u32,
    pub tari: u32,
    pub x: u32,
    pub pw: u32,
    pub rtcal: u32,
    pub trcal: u32,
    pub divide_ratio: u32,
    pub miller_number: u32,
    pub t2r_link_frequency: u32,
    pub var_t2_delay: u32,
    pub rx_delay: u32,
    pub min_total_t2_delay: u32,
    pub tx_propagation_delay: u32,
}

/// Decoded `MAC_VER` register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacVersion {
    pub major: u8,
    pub minor: u8,
    pub maintenance: u8,
    pub release: u8,
}

impl MacVersion {
    /// First release with the responsiveness-timeout feature
    pub const RESPONSIVENESS_TIMEOUT_RELEASE: MacVersion = MacVersion {
        major: 2,
        minor: 4,
        maintenance: 0,
        release: 0,
    };

    pub fn from_register(value: u32) -> Self {
        let byte = |field: BitField| field.get(value) as u8;
        Self {
            major: byte(mac_ver::MAJOR),
            minor: byte(mac_ver::MINOR),
            maintenance: byte(mac_ver::MAINTENANCE),
            release: byte(mac_ver::RELEASE),
        }
    }

    pub fn is_pre_2_4(&self) -> bool {
        *self < Self::RESPONSIVENESS_TIMEOUT_RELEASE
    }
}

impl std::fmt::Display for MacVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.maintenance, self.release
        )
    }
}

/// How a tag operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    /// Cancelled gracefully; the MAC finished the command before stopping
    Cancelled,
    /// Aborted; remaining data was discarded
    Aborted,
}

/// What the packet callback wants the packet loop to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketAction {
    #[default]
    Continue,
    /// Cancel the operation gracefully
    Cancel,
}

/// One contiguous range of MAC nonvolatile memory to program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvMemBlock<'a> {
    pub address: u32,
    pub data: &'a [u8],
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
