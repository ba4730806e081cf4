//! MAC packet wire format.
//!
//! Every packet starts with an 8-byte common header followed by a
//! type-specific body of `pkt_len * 4` bytes. All scalar fields are
//! little-endian ("MAC format") on the wire; the accessors here return host
//! values. Tag backscatter (PC, EPC, read data) is carried as raw bytes in
//! tag order and is never swapped.
//!
//! ```text
//! +---------+-------+----------+---------+----------+---------------+
//! | pkt_ver | flags | pkt_type | pkt_len | reserved | body ...      |
//! |   u8    |  u8   |   u16    |   u16   |   u16    | pkt_len words |
//! +---------+-------+----------+---------+----------+---------------+
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::types::bytes_to_hex;

/// Size of the common packet header in bytes.
pub const COMMON_HEADER_LEN: usize = 8;
/// The header length field counts 32-bit words.
pub const BYTES_PER_LEN_UNIT: usize = 4;

const PAD_BYTES_SHIFT: u8 = 6;

/// Packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    CommandBegin,
    CommandEnd,
    AntennaCycleBegin,
    AntennaBegin,
    InventoryRoundBegin,
    Inventory,
    TagAccess,
    AntennaCycleEnd,
    AntennaEnd,
    InventoryRoundEnd,
    InventoryCycleBegin,
    InventoryCycleEnd,
    CarrierInfo,
    CommandActive,
    Debug,
    OemConfigRead,
    BypassRegisterRead,
    GpioRead,
    NvUpdateConfig,
    LinkProfileRegisterRead,
    Unknown(u16),
}

impl PacketType {
    pub fn code(self) -> u16 {
        match self {
            PacketType::CommandBegin => 0x0000,
            PacketType::CommandEnd => 0x0001,
            PacketType::AntennaCycleBegin => 0x0002,
            PacketType::AntennaBegin => 0x0003,
            PacketType::InventoryRoundBegin => 0x0004,
            PacketType::Inventory => 0x0005,
            PacketType::TagAccess => 0x0006,
            PacketType::AntennaCycleEnd => 0x0007,
            PacketType::AntennaEnd => 0x0008,
            PacketType::InventoryRoundEnd => 0x0009,
            PacketType::InventoryCycleBegin => 0x000A,
            PacketType::InventoryCycleEnd => 0x000B,
            PacketType::CarrierInfo => 0x000C,
            PacketType::CommandActive => 0x000E,
            PacketType::Debug => 0x3003,
            PacketType::OemConfigRead => 0x3005,
            PacketType::BypassRegisterRead => 0x3007,
            PacketType::GpioRead => 0x3008,
            PacketType::NvUpdateConfig => 0x300E,
            PacketType::LinkProfileRegisterRead => 0x3010,
            PacketType::Unknown(code) => code,
        }
    }
}

impl From<u16> for PacketType {
    fn from(code: u16) -> Self {
        match code {
            0x0000 => PacketType::CommandBegin,
            0x0001 => PacketType::CommandEnd,
            0x0002 => PacketType::AntennaCycleBegin,
            0x0003 => PacketType::AntennaBegin,
            0x0004 => PacketType::InventoryRoundBegin,
            0x0005 => PacketType::Inventory,
            0x0006 => PacketType::TagAccess,
            0x0007 => PacketType::AntennaCycleEnd,
            0x0008 => PacketType::AntennaEnd,
            0x0009 => PacketType::InventoryRoundEnd,
            0x000A => PacketType::InventoryCycleBegin,
            0x000B => PacketType::InventoryCycleEnd,
            0x000C => PacketType::CarrierInfo,
            0x000E => PacketType::CommandActive,
            0x3003 => PacketType::Debug,
            0x3005 => PacketType::OemConfigRead,
            0x3007 => PacketType::BypassRegisterRead,
            0x3008 => PacketType::GpioRead,
            0x300E => PacketType::NvUpdateConfig,
            0x3010 => PacketType::LinkProfileRegisterRead,
            other => PacketType::Unknown(other),
        }
    }
}

/// The common header shared by every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub flags: u8,
    pub packet_type: PacketType,
    /// Body length in 32-bit words.
    pub length_words: u16,
    pub reserved: u16,
}

impl PacketHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < COMMON_HEADER_LEN {
            return None;
        }
        Some(Self {
            version: bytes[0],
            flags: bytes[1],
            packet_type: PacketType::from(LittleEndian::read_u16(&bytes[2..4])),
            length_words: LittleEndian::read_u16(&bytes[4..6]),
            reserved: LittleEndian::read_u16(&bytes[6..8]),
        })
    }

    pub fn body_len(&self) -> usize {
        self.length_words as usize * BYTES_PER_LEN_UNIT
    }

    pub fn encode(&self) -> [u8; COMMON_HEADER_LEN] {
        let mut out = [0u8; COMMON_HEADER_LEN];
        out[0] = self.version;
        out[1] = self.flags;
        LittleEndian::write_u16(&mut out[2..4], self.packet_type.code());
        LittleEndian::write_u16(&mut out[4..6], self.length_words);
        LittleEndian::write_u16(&mut out[6..8], self.reserved);
        out
    }

    /// Trailing pad bytes in the body, encoded in flag bits 7:6.
    fn pad_bytes(&self) -> usize {
        (self.flags >> PAD_BYTES_SHIFT) as usize
    }
}

/// Build a complete packet. The body is zero-padded to a whole number of
/// words and the pad count is recorded in the flags.
pub fn encode(packet_type: PacketType, flags: u8, body: &[u8]) -> Vec<u8> {
    let pad = (BYTES_PER_LEN_UNIT - body.len() % BYTES_PER_LEN_UNIT) % BYTES_PER_LEN_UNIT;
    let header = PacketHeader {
        version: 1,
        flags: (flags & 0x3F) | ((pad as u8) << PAD_BYTES_SHIFT),
        packet_type,
        length_words: ((body.len() + pad) / BYTES_PER_LEN_UNIT) as u16,
        reserved: 0,
    };
    let mut out = Vec::with_capacity(COMMON_HEADER_LEN + body.len() + pad);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out.resize(out.len() + pad, 0);
    out
}

/// A packet received from the MAC, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    header: PacketHeader,
    body: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBegin {
    pub command: u32,
    pub ms_ctr: u32,
    /// The command will run until cancelled.
    pub continuous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEnd {
    pub ms_ctr: u32,
    pub status: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OemConfigRecord {
    pub address: u32,
    pub data: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BypassRegisterRecord {
    pub address: u16,
    pub data: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvUpdateConfigRecord {
    /// Largest update packet the MAC accepts, in bytes.
    pub max_packet_len: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkProfileRegisterRecord {
    pub profile: u16,
    pub address: u16,
    pub data: u16,
}

/// A singulated tag from an inventory round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryRecord<'a> {
    pub ms_ctr: u32,
    pub wb_rssi: u8,
    pub nb_rssi: u8,
    pub phase: u8,
    pub channel: u8,
    pub rssi: u16,
    pub crc_valid: bool,
    /// PC, EPC and CRC exactly as backscattered.
    pub data: &'a [u8],
}

impl<'a> InventoryRecord<'a> {
    const FIXED_LEN: usize = 12;

    pub fn pc(&self) -> Option<u16> {
        self.data.get(0..2).map(|pc| u16::from_be_bytes([pc[0], pc[1]]))
    }

    /// EPC bytes as announced by the PC length field, clamped to the data received.
    pub fn epc(&self) -> &'a [u8] {
        let Some(pc) = self.pc() else {
            return &[];
        };
        let words = ((pc >> 11) & 0x1F) as usize;
        let end = (2 + words * 2).min(self.data.len());
        &self.data[2..end]
    }

    pub fn epc_hex(&self) -> String {
        bytes_to_hex(self.epc())
    }
}

/// Result of a tag access (read, write, lock, kill, block operations, QT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagAccessRecord<'a> {
    pub ms_ctr: u32,
    pub command: u8,
    pub tag_error: u8,
    pub protocol_error: u16,
    pub write_word_count: u16,
    pub error: bool,
    /// Words read from the tag, in tag byte order.
    pub data: &'a [u8],
}

impl TagAccessRecord<'_> {
    const FIXED_LEN: usize = 12;
}

impl<'a> Packet<'a> {
    /// Parse a complete packet. Returns `None` if `bytes` is shorter than
    /// the header plus the body length it announces.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let header = PacketHeader::parse(bytes)?;
        let end = COMMON_HEADER_LEN + header.body_len();
        let body = bytes.get(COMMON_HEADER_LEN..end)?;
        Some(Self { header, body })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        self.body.get(offset..offset + 2).map(LittleEndian::read_u16)
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        self.body.get(offset..offset + 4).map(LittleEndian::read_u32)
    }

    fn is(&self, packet_type: PacketType) -> bool {
        self.header.packet_type == packet_type
    }

    /// Body with the trailing pad bytes removed.
    fn unpadded(&self, fixed: usize) -> Option<&'a [u8]> {
        let end = self.body.len().checked_sub(self.header.pad_bytes())?;
        self.body.get(fixed..end)
    }

    pub fn command_begin(&self) -> Option<CommandBegin> {
        if !self.is(PacketType::CommandBegin) {
            return None;
        }
        Some(CommandBegin {
            command: self.u32_at(0)?,
            ms_ctr: self.u32_at(4)?,
            continuous: self.header.flags & 0x01 != 0,
        })
    }

    pub fn command_end(&self) -> Option<CommandEnd> {
        if !self.is(PacketType::CommandEnd) {
            return None;
        }
        Some(CommandEnd {
            ms_ctr: self.u32_at(0)?,
            status: self.u32_at(4)?,
        })
    }

    pub fn oem_config(&self) -> Option<OemConfigRecord> {
        if !self.is(PacketType::OemConfigRead) {
            return None;
        }
        Some(OemConfigRecord {
            address: self.u32_at(0)?,
            data: self.u32_at(4)?,
        })
    }

    pub fn bypass_register(&self) -> Option<BypassRegisterRecord> {
        if !self.is(PacketType::BypassRegisterRead) {
            return None;
        }
        Some(BypassRegisterRecord {
            address: self.u16_at(0)?,
            data: self.u16_at(2)?,
        })
    }

    pub fn gpio(&self) -> Option<u32> {
        if !self.is(PacketType::GpioRead) {
            return None;
        }
        self.u32_at(0)
    }

    pub fn nv_update_config(&self) -> Option<NvUpdateConfigRecord> {
        if !self.is(PacketType::NvUpdateConfig) {
            return None;
        }
        Some(NvUpdateConfigRecord {
            max_packet_len: self.u32_at(0)?,
            flags: self.u32_at(4)?,
        })
    }

    pub fn link_profile_register(&self) -> Option<LinkProfileRegisterRecord> {
        if !self.is(PacketType::LinkProfileRegisterRead) {
            return None;
        }
        Some(LinkProfileRegisterRecord {
            profile: self.u16_at(0)?,
            address: self.u16_at(2)?,
            data: self.u16_at(4)?,
        })
    }

    pub fn inventory(&self) -> Option<InventoryRecord<'a>> {
        if !self.is(PacketType::Inventory) {
            return None;
        }
        Some(InventoryRecord {
            ms_ctr: self.u32_at(0)?,
            wb_rssi: *self.body.get(4)?,
            nb_rssi: *self.body.get(5)?,
            phase: *self.body.get(6)?,
            channel: *self.body.get(7)?,
            rssi: self.u16_at(8)?,
            crc_valid: self.header.flags & 0x01 == 0,
            data: self.unpadded(InventoryRecord::FIXED_LEN)?,
        })
    }

    pub fn tag_access(&self) -> Option<TagAccessRecord<'a>> {
        if !self.is(PacketType::TagAccess) {
            return None;
        }
        Some(TagAccessRecord {
            ms_ctr: self.u32_at(0)?,
            command: *self.body.get(4)?,
            tag_error: *self.body.get(5)?,
            protocol_error: self.u16_at(6)?,
            write_word_count: self.u16_at(8)?,
            error: self.header.flags & 0x01 != 0,
            data: self.unpadded(TagAccessRecord::FIXED_LEN)?,
        })
    }
}
