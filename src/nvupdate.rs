//! Nonvolatile memory update.
//!
//! After `CMD_NV_MEM_UPDATE` the MAC leaves the normal packet protocol and
//! speaks a separate framing: every packet starts with
//! `{magic: u16 = 0xF00D, cmd: u16, pkt_len: u16, reserved: u16}` where
//! `pkt_len` counts the 32-bit words after the header. The host sends one
//! `UPD_RANGE` packet per chunk and the MAC answers each with a `STATUS`
//! packet `{re_cmd: u32, status: u32}`; the low half of `status` is the
//! update status, the high half a MAC error number.
//!
//! ```text
//! UPD_RANGE: | header | abs_addr | crc | flags | data ... (padded to words) |
//!                                  ^^^ covers everything except itself
//! ```

use byteorder::{ByteOrder, LittleEndian};
use crc::{CRC_32_MPEG_2, Crc};
use log::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::exchange::{self, Expected, Response};
use crate::link::MacLink;
use crate::registers::commands::CMD_NV_MEM_UPDATE;
use crate::transport::MacTransport;
use crate::types::NvMemBlock;

pub(crate) const MAGIC: u16 = 0xF00D;
pub(crate) const HEADER_LEN: usize = 8;

pub(crate) mod command {
    pub(crate) const UPD_RANGE: u16 = 0x0001;
    pub(crate) const UPD_COMPLETE: u16 = 0x0002;
    pub(crate) const STATUS: u16 = 0x0003;
}

pub(crate) mod status {
    pub(crate) const SUCCESS: u32 = 0;
    pub(crate) const CRC_ERR: u32 = 1;
    pub(crate) const WR_FAIL: u32 = 2;
    pub(crate) const INT_MEM_BNDS: u32 = 3;
    pub(crate) const UNK_CMD: u32 = 4;
    pub(crate) const BNDS: u32 = 5;
    pub(crate) const RXPKT_MAX: u32 = 6;
    pub(crate) const GEN_RXPKT_ERR: u32 = 7;
    pub(crate) const RX_TO: u32 = 8;
    pub(crate) const HDR_ERR: u32 = 9;
    pub(crate) const ENTRY_OK: u32 = 10;
}

const OP: &str = "update_nonvolatile_memory";

/// Attempts per chunk before giving up.
const MAX_ATTEMPTS: u32 = 2;

/// `abs_addr`, `crc` and `flags` ahead of the data.
const RANGE_FIXED_LEN: usize = 12;
const CRC_OFFSET: usize = HEADER_LEN + 4;
const CRC_LEN: usize = 4;

const FLAG_PAD_BYTES_MASK: u32 = 0x03;
const FLAG_TEST_MODE: u32 = 1 << 2;

static NV_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC of an update packet, skipping the CRC field.
pub(crate) fn packet_crc(packet: &[u8]) -> u32 {
    let mut digest = NV_CRC.digest();
    digest.update(&packet[..CRC_OFFSET]);
    digest.update(&packet[CRC_OFFSET + CRC_LEN..]);
    digest.finalize()
}

fn header(cmd: u16, words: usize) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    LittleEndian::write_u16(&mut out[0..2], MAGIC);
    LittleEndian::write_u16(&mut out[2..4], cmd);
    LittleEndian::write_u16(&mut out[4..6], words as u16);
    out
}

/// Build an `UPD_RANGE` packet for `data` starting at `address`.
pub(crate) fn range_packet(address: u32, data: &[u8], test_mode: bool) -> Vec<u8> {
    let pad = (4 - data.len() % 4) % 4;
    let body_len = RANGE_FIXED_LEN + data.len() + pad;

    let mut flags = pad as u32 & FLAG_PAD_BYTES_MASK;
    if test_mode {
        flags |= FLAG_TEST_MODE;
    }

    let mut packet = Vec::with_capacity(HEADER_LEN + body_len);
    packet.extend_from_slice(&header(command::UPD_RANGE, body_len / 4));
    packet.extend_from_slice(&address.to_le_bytes());
    packet.extend_from_slice(&[0u8; CRC_LEN]);
    packet.extend_from_slice(&flags.to_le_bytes());
    packet.extend_from_slice(data);
    packet.resize(HEADER_LEN + body_len, 0);

    let crc = packet_crc(&packet);
    LittleEndian::write_u32(&mut packet[CRC_OFFSET..CRC_OFFSET + CRC_LEN], crc);
    packet
}

/// Largest chunk of data per packet, a whole number of words.
fn chunk_size(mac_max_packet: u32, transport_max_packet: usize) -> Result<usize> {
    let max = (mac_max_packet as usize).min(transport_max_packet);
    let size = max.saturating_sub(HEADER_LEN + RANGE_FIXED_LEN) & !0x03;
    if size == 0 {
        return Err(Error::new(
            ErrorKind::NonvolatileInitFailed,
            OP,
            format!("maximum packet of {} bytes leaves no room for data", max),
        ));
    }
    Ok(size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NvStatus {
    re_cmd: u16,
    code: u32,
    mac_error: u16,
}

fn read_status<T: MacTransport>(link: &mut MacLink<T>) -> Result<NvStatus> {
    let mut head = [0u8; HEADER_LEN];
    link.retrieve_buffer(&mut head, None)?;
    let magic = LittleEndian::read_u16(&head[0..2]);
    let cmd = LittleEndian::read_u16(&head[2..4]);
    let len = LittleEndian::read_u16(&head[4..6]) as usize * 4;
    if magic != MAGIC || cmd != command::STATUS || len < 8 {
        return Err(Error::new(
            ErrorKind::NonvolatilePacketError,
            OP,
            format!("bad status header {:02X?}", head),
        ));
    }

    let mut body = vec![0u8; len];
    link.retrieve_buffer(&mut body, None)?;
    let raw = LittleEndian::read_u32(&body[4..8]);
    let reply = NvStatus {
        re_cmd: LittleEndian::read_u32(&body[0..4]) as u16,
        code: raw & 0xFFFF,
        mac_error: (raw >> 16) as u16,
    };
    debug!("NV status {:?}", reply);
    Ok(reply)
}

fn error_kind(code: u32) -> ErrorKind {
    match code {
        status::CRC_ERR => ErrorKind::NonvolatileCrcFailed,
        status::BNDS | status::INT_MEM_BNDS => ErrorKind::NonvolatileOutOfBounds,
        status::WR_FAIL => ErrorKind::NonvolatileWriteFailed,
        status::UNK_CMD | status::HDR_ERR | status::RXPKT_MAX => ErrorKind::NonvolatilePacketError,
        _ => ErrorKind::NonvolatilePacketError,
    }
}

fn status_error(reply: NvStatus, detail: &str) -> Error {
    Error::new(
        error_kind(reply.code),
        OP,
        format!(
            "{}: status {} (MAC error 0x{:04X})",
            detail, reply.code, reply.mac_error
        ),
    )
}

/// The MAC resets itself after these; nothing more may be sent.
fn device_resets(code: u32) -> bool {
    matches!(
        code,
        status::WR_FAIL | status::GEN_RXPKT_ERR | status::RX_TO | status::INT_MEM_BNDS
    )
}

struct ChunkFailure {
    error: Error,
    device_resetting: bool,
}

impl From<Error> for ChunkFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            device_resetting: false,
        }
    }
}

fn send_chunk<T: MacTransport>(
    link: &mut MacLink<T>,
    address: u32,
    data: &[u8],
    test_mode: bool,
) -> std::result::Result<(), ChunkFailure> {
    let packet = range_packet(address, data, test_mode);
    let mut attempts = 0;
    loop {
        attempts += 1;
        link.write_all(&packet, OP)?;
        let reply = read_status(link)?;
        if reply.re_cmd != command::UPD_RANGE {
            return Err(Error::new(
                ErrorKind::NonvolatilePacketError,
                OP,
                format!("status answers command {}", reply.re_cmd),
            )
            .into());
        }

        match reply.code {
            status::SUCCESS => return Ok(()),
            code if device_resets(code) => {
                error!(
                    "NV write at 0x{:08X} failed with status {}; MAC is resetting",
                    address, code
                );
                return Err(ChunkFailure {
                    error: status_error(reply, "update aborted"),
                    device_resetting: true,
                });
            }
            code if attempts < MAX_ATTEMPTS => {
                warn!(
                    "NV write at 0x{:08X} rejected with status {}, retrying",
                    address, code
                );
            }
            _ => {
                error!(
                    "NV write at 0x{:08X} failed after {} attempts",
                    address, attempts
                );
                return Err(status_error(reply, "retries exhausted").into());
            }
        }
    }
}

fn send_blocks<T: MacTransport>(
    link: &mut MacLink<T>,
    blocks: &[NvMemBlock<'_>],
    chunk: usize,
    test_mode: bool,
) -> std::result::Result<(), ChunkFailure> {
    for block in blocks {
        debug!(
            "NV block at 0x{:08X}, {} bytes",
            block.address,
            block.data.len()
        );
        for (index, data) in block.data.chunks(chunk).enumerate() {
            let address = block.address + (index * chunk) as u32;
            send_chunk(link, address, data, test_mode)?;
        }
    }
    Ok(())
}

fn send_complete<T: MacTransport>(link: &mut MacLink<T>) -> Result<()> {
    link.write_all(&header(command::UPD_COMPLETE, 0), OP)?;
    let reply = read_status(link)?;
    if reply.re_cmd != command::UPD_COMPLETE || reply.code != status::SUCCESS {
        return Err(status_error(reply, "update complete rejected"));
    }
    Ok(())
}

/// Program `blocks` into MAC nonvolatile memory.
///
/// The update-complete packet is sent even when a chunk failed so the MAC
/// leaves update mode, unless the MAC reported a failure after which it
/// resets on its own. The first failure is the one reported.
pub(crate) fn update<T: MacTransport>(
    link: &mut MacLink<T>,
    blocks: &[NvMemBlock<'_>],
    test_mode: bool,
) -> Result<()> {
    let response = exchange::execute(
        link,
        OP,
        CMD_NV_MEM_UPDATE,
        Expected::NvUpdateConfig,
        None,
        None,
    )?;
    let Response::NvUpdateConfig(config) = response else {
        return Err(Error::new(
            ErrorKind::NonvolatileInitFailed,
            OP,
            "no update configuration from MAC",
        ));
    };

    let entry = read_status(link).map_err(|e| {
        Error::new(ErrorKind::NonvolatileInitFailed, OP, e.to_string())
    })?;
    if entry.code != status::ENTRY_OK {
        error!("MAC refused NV update mode: status {}", entry.code);
        return Err(Error::new(
            ErrorKind::NonvolatileInitFailed,
            OP,
            format!("entry status {} (MAC error 0x{:04X})", entry.code, entry.mac_error),
        ));
    }

    let chunk = chunk_size(config.max_packet_len, link.characteristics().max_packet_size)?;
    info!(
        "NV update: {} block(s), {} byte chunks{}",
        blocks.len(),
        chunk,
        if test_mode { ", test mode" } else { "" }
    );

    let failure = match send_blocks(link, blocks, chunk, test_mode) {
        Ok(()) => None,
        Err(ChunkFailure {
            error,
            device_resetting: true,
        }) => return Err(error),
        Err(ChunkFailure { error, .. }) => Some(error),
    };

    let complete = send_complete(link);
    match (failure, complete) {
        (Some(error), Err(complete_err)) => {
            warn!("Leaving NV update mode also failed: {}", complete_err);
            Err(error)
        }
        (Some(error), Ok(())) => Err(error),
        (None, result) => {
            if result.is_ok() {
                info!("NV update complete");
            }
            result
        }
    }
}
