//! ISO 18000-6C tag operations: parameters and register programming.
//!
//! Each operation programs the tag-access registers and then starts a
//! streaming command exchange whose packets go to the caller's callback.

use log::debug;

use crate::bits::BitField;
use crate::error::{Error, Result};
use crate::link::MacLink;
use crate::registers::{
    HST_INV_CFG, HST_INV_EPC_MATCH_CFG, HST_TAGACC_ACCPWD, HST_TAGACC_BANK, HST_TAGACC_CNT,
    HST_TAGACC_DESC_CFG, HST_TAGACC_KILLPWD, HST_TAGACC_LOCKCFG, HST_TAGACC_PTR, HST_TAGQTDAT,
    HST_TAGWRDAT_SEL, TAGWRDAT_REGISTERS_PER_BANK, commands::*, fields, tagwrdat,
};
use crate::transport::MacTransport;
use crate::types::MemoryBank;

/// Number of `HST_TAGWRDAT` banks.
const WRITE_DATA_BANKS: usize = 8;
/// Write-data registers available across all banks.
pub const MAX_WRITE_REGISTERS: usize = WRITE_DATA_BANKS * TAGWRDAT_REGISTERS_PER_BANK;

/// Options shared by every tag operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommonParams {
    /// Stop after this many tags; zero runs until the antenna cycle ends.
    pub stop_count: u8,
    /// Issue the configured Select commands before singulation.
    pub perform_select: bool,
    /// Only report or access tags passing the post-singulation EPC match.
    pub perform_post_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InventoryParams {
    pub common: CommonParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadParams {
    pub common: CommonParams,
    pub bank: MemoryBank,
    /// Word offset into the bank
    pub offset: u16,
    /// Words to read, 1 to 255
    pub count: u8,
    pub access_password: u32,
}

/// Words to write with an ordinary Write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteData<'a> {
    /// A contiguous run of words starting at `offset`.
    Sequential { offset: u16, data: &'a [u16] },
    /// Each word goes to the offset at the same index.
    Random { offsets: &'a [u16], data: &'a [u16] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteParams<'a> {
    pub common: CommonParams,
    pub bank: MemoryBank,
    pub data: WriteData<'a>,
    /// Read back each written word
    pub verify: bool,
    /// Attempts per word after a failed verify, 0 to 7
    pub verify_retry_count: u8,
    pub access_password: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWriteParams<'a> {
    pub common: CommonParams,
    pub bank: MemoryBank,
    pub offset: u16,
    /// At most 255 words
    pub data: &'a [u16],
    pub verify: bool,
    pub verify_retry_count: u8,
    pub access_password: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEraseParams {
    pub common: CommonParams,
    pub bank: MemoryBank,
    pub offset: u16,
    pub count: u8,
    pub access_password: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillParams {
    pub common: CommonParams,
    pub access_password: u32,
    pub kill_password: u32,
}

/// Lock setting for one tag memory area or password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPermission {
    /// Leave the current setting alone.
    #[default]
    Unchanged,
    /// Writeable (or readable, for passwords) from any state.
    Open,
    /// Permanently writeable; can never be locked.
    PermanentlyOpen,
    /// Writeable only from the secured state.
    Secured,
    /// Never writeable again.
    PermanentlyLocked,
}

impl LockPermission {
    /// (action, mask) bit pairs for this area.
    fn bits(self) -> (u32, u32) {
        match self {
            LockPermission::Unchanged => (0b00, 0b00),
            LockPermission::Open => (0b00, 0b11),
            LockPermission::PermanentlyOpen => (0b01, 0b11),
            LockPermission::Secured => (0b10, 0b11),
            LockPermission::PermanentlyLocked => (0b11, 0b11),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockParams {
    pub common: CommonParams,
    pub kill_password: LockPermission,
    pub access_password: LockPermission,
    pub epc_memory: LockPermission,
    pub tid_memory: LockPermission,
    pub user_memory: LockPermission,
    /// Password used to reach the secured state
    pub password: u32,
}

impl LockParams {
    /// The 20-bit Lock payload split into its action and mask halves.
    fn action_and_mask(&self) -> (u32, u32) {
        let areas = [
            self.kill_password,
            self.access_password,
            self.epc_memory,
            self.tid_memory,
            self.user_memory,
        ];
        areas
            .iter()
            .enumerate()
            .fold((0, 0), |(action, mask), (index, area)| {
                let shift = 8 - 2 * index as u32;
                let (a, m) = area.bits();
                (action | a << shift, mask | m << shift)
            })
    }
}

/// Monza QT control settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QtParams {
    pub common: CommonParams,
    /// Write the settings below; otherwise only read them back
    pub write: bool,
    /// Keep the settings across power cycles
    pub persistent: bool,
    /// Reduce the tag's read range
    pub short_range: bool,
    /// Expose the public memory map instead of the private one
    pub public_memory_map: bool,
    pub access_password: u32,
}

/// A tag operation ready to be programmed into the MAC.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TagOperation<'a> {
    Inventory(&'a InventoryParams),
    Read(&'a ReadParams),
    Write(&'a WriteParams<'a>),
    BlockWrite(&'a BlockWriteParams<'a>),
    BlockErase(&'a BlockEraseParams),
    Kill(&'a KillParams),
    Lock(&'a LockParams),
    Qt(&'a QtParams),
}

impl TagOperation<'_> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            TagOperation::Inventory(_) => "tag_inventory",
            TagOperation::Read(_) => "tag_read",
            TagOperation::Write(_) => "tag_write",
            TagOperation::BlockWrite(_) => "tag_block_write",
            TagOperation::BlockErase(_) => "tag_block_erase",
            TagOperation::Kill(_) => "tag_kill",
            TagOperation::Lock(_) => "tag_lock",
            TagOperation::Qt(_) => "tag_qt",
        }
    }

    pub(crate) fn command(&self) -> u32 {
        match self {
            TagOperation::Inventory(_) => CMD_18K6CINV,
            TagOperation::Read(_) => CMD_18K6CREAD,
            TagOperation::Write(_) => CMD_18K6CWRITE,
            TagOperation::BlockWrite(_) => CMD_18K6CBLOCKWRITE,
            TagOperation::BlockErase(_) => CMD_18K6CBLOCKERASE,
            TagOperation::Kill(_) => CMD_18K6CKILL,
            TagOperation::Lock(_) => CMD_18K6CLOCK,
            TagOperation::Qt(_) => CMD_18K6CQT,
        }
    }

    fn common(&self) -> &CommonParams {
        match self {
            TagOperation::Inventory(p) => &p.common,
            TagOperation::Read(p) => &p.common,
            TagOperation::Write(p) => &p.common,
            TagOperation::BlockWrite(p) => &p.common,
            TagOperation::BlockErase(p) => &p.common,
            TagOperation::Kill(p) => &p.common,
            TagOperation::Lock(p) => &p.common,
            TagOperation::Qt(p) => &p.common,
        }
    }

    /// Check every parameter before touching the MAC.
    pub(crate) fn validate(&self) -> Result<()> {
        let op = self.name();
        match self {
            TagOperation::Read(p) if p.count == 0 => {
                Err(Error::invalid(op, "read count must be at least one word"))
            }
            TagOperation::BlockErase(p) if p.count == 0 => {
                Err(Error::invalid(op, "erase count must be at least one word"))
            }
            TagOperation::Write(p) => {
                check_verify_retry(op, p.verify_retry_count)?;
                let (words, offsets) = match p.data {
                    WriteData::Sequential { data, .. } => (data.len(), data.len()),
                    WriteData::Random { offsets, data } => (data.len(), offsets.len()),
                };
                if words != offsets {
                    return Err(Error::invalid(
                        op,
                        format!("{} offsets for {} words", offsets, words),
                    ));
                }
                check_word_count(op, words, MAX_WRITE_REGISTERS)
            }
            TagOperation::BlockWrite(p) => {
                check_verify_retry(op, p.verify_retry_count)?;
                check_word_count(op, p.data.len(), fields::tagacc_cnt::COUNT.max() as usize)
            }
            _ => Ok(()),
        }
    }

    /// Program the registers for this operation. Does not start the command.
    pub(crate) fn program<T: MacTransport>(&self, link: &mut MacLink<T>) -> Result<()> {
        self.validate()?;
        debug!("Programming {}", self.name());
        write_common(link, self.common())?;

        match self {
            TagOperation::Inventory(_) => Ok(()),
            TagOperation::Read(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                write_range(link, p.bank, p.offset, u32::from(p.count))
            }
            TagOperation::Write(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                write_access_config(link, p.verify, p.verify_retry_count)?;
                let values = offset_data_pairs(p.data);
                write_range(link, p.bank, 0, values.len() as u32)?;
                write_data_registers(link, &values)
            }
            TagOperation::BlockWrite(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                write_access_config(link, p.verify, p.verify_retry_count)?;
                write_range(link, p.bank, p.offset, p.data.len() as u32)?;
                write_data_registers(link, &pack_word_pairs(p.data))
            }
            TagOperation::BlockErase(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                write_range(link, p.bank, p.offset, u32::from(p.count))
            }
            TagOperation::Kill(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                link.write_register(HST_TAGACC_KILLPWD, p.kill_password)
            }
            TagOperation::Lock(p) => {
                link.write_register(HST_TAGACC_ACCPWD, p.password)?;
                let (action, mask) = p.action_and_mask();
                let lock = fields::tagacc_lockcfg::MASK
                    .set(fields::tagacc_lockcfg::ACTION.set(0, action), mask);
                link.write_register(HST_TAGACC_LOCKCFG, lock)
            }
            TagOperation::Qt(p) => {
                use fields::tagqtdat::*;
                link.write_register(HST_TAGACC_ACCPWD, p.access_password)?;
                let mut qt = WRITE.set_bool(0, p.write);
                qt = PERSISTENT.set_bool(qt, p.persistent);
                qt = SHORT_RANGE.set_bool(qt, p.short_range);
                qt = PUBLIC_MEMORY_MAP.set_bool(qt, p.public_memory_map);
                link.write_register(HST_TAGQTDAT, qt)
            }
        }
    }
}

fn check_verify_retry(op: &'static str, retries: u8) -> Result<()> {
    if !fields::tagacc_desc_cfg::RETRY.fits(retries.into()) {
        return Err(Error::invalid(op, format!("verify retry count {} exceeds 7", retries)));
    }
    Ok(())
}

fn check_word_count(op: &'static str, words: usize, max: usize) -> Result<()> {
    if words == 0 || words > max {
        return Err(Error::invalid(
            op,
            format!("{} words to write, expected 1 to {}", words, max),
        ));
    }
    Ok(())
}

/// Read-modify-write one field group of a register.
fn update_register<T: MacTransport>(
    link: &mut MacLink<T>,
    address: u16,
    updates: &[(BitField, u32)],
) -> Result<()> {
    let current = link.read_register(address)?;
    let value = updates
        .iter()
        .fold(current, |reg, (field, value)| field.set(reg, *value));
    link.write_register(address, value)
}

fn write_common<T: MacTransport>(link: &mut MacLink<T>, common: &CommonParams) -> Result<()> {
    update_register(
        link,
        HST_INV_CFG,
        &[
            (fields::inv_cfg::MATCH_REP, u32::from(common.stop_count)),
            (fields::inv_cfg::TAG_SEL, u32::from(common.perform_select)),
        ],
    )?;
    update_register(
        link,
        HST_INV_EPC_MATCH_CFG,
        &[(
            fields::inv_epc_match_cfg::ENABLED,
            u32::from(common.perform_post_match),
        )],
    )
}

fn write_access_config<T: MacTransport>(link: &mut MacLink<T>, verify: bool, retries: u8) -> Result<()> {
    let cfg = fields::tagacc_desc_cfg::RETRY.set(
        fields::tagacc_desc_cfg::VERIFY.set_bool(0, verify),
        retries.into(),
    );
    link.write_register(HST_TAGACC_DESC_CFG, cfg)
}

fn write_range<T: MacTransport>(link: &mut MacLink<T>, bank: MemoryBank, offset: u16, count: u32) -> Result<()> {
    link.write_register(HST_TAGACC_BANK, bank as u32)?;
    link.write_register(HST_TAGACC_PTR, offset.into())?;
    link.write_register(HST_TAGACC_CNT, count)
}

/// One register per word: the tag offset in the high half, the word in the low half.
pub(crate) fn offset_data_pairs(data: WriteData<'_>) -> Vec<u32> {
    use fields::tagwrdat::{DATA, OFFSET};
    let pair = |offset: u16, word: u16| OFFSET.set(DATA.set(0, word.into()), offset.into());
    match data {
        WriteData::Sequential { offset, data } => data
            .iter()
            .enumerate()
            .map(|(i, word)| pair(offset.wrapping_add(i as u16), *word))
            .collect(),
        WriteData::Random { offsets, data } => offsets
            .iter()
            .zip(data)
            .map(|(offset, word)| pair(*offset, *word))
            .collect(),
    }
}

/// Two words per register, first word high; an odd final word is zero-padded.
pub(crate) fn pack_word_pairs(data: &[u16]) -> Vec<u32> {
    use fields::tagwrdat::{DATA_HIGH, DATA_LOW};
    data.chunks(2)
        .map(|pair| {
            let low = pair.get(1).copied().unwrap_or(0);
            DATA_HIGH.set(DATA_LOW.set(0, low.into()), pair[0].into())
        })
        .collect()
}

/// Fill the write-data registers bank by bank.
fn write_data_registers<T: MacTransport>(link: &mut MacLink<T>, values: &[u32]) -> Result<()> {
    for (bank, chunk) in values.chunks(TAGWRDAT_REGISTERS_PER_BANK).enumerate() {
        link.write_register(HST_TAGWRDAT_SEL, bank as u32)?;
        for (index, value) in chunk.iter().enumerate() {
            link.write_register(tagwrdat(index), *value)?;
        }
    }
    Ok(())
}
