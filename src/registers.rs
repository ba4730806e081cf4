//! MAC virtual register map, register bit-fields and command codes.
//!
//! The table below is the single source for register addresses. Each entry
//! records how the register may be accessed and whether it is a plain
//! register, a bank selector, or a banked register addressed through a
//! selector.

use crate::bits::BitField;

/// Access allowed on a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        self != Access::WriteOnly
    }

    pub fn writable(self) -> bool {
        self != Access::ReadOnly
    }
}

/// Structural kind of a register as declared in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layout {
    Normal,
    Selector { bank_size: u16 },
    Banked { selector: u16 },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RegisterDescriptor {
    pub address: u16,
    pub name: &'static str,
    pub access: Access,
    pub layout: Layout,
}

/// Register type as reported by [`Radio::read_mac_register_info`](crate::Radio::read_mac_register_info).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Normal,
    Banked,
    Selector,
}

/// Description of a MAC register, resolved against the live selector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub address: u16,
    pub name: &'static str,
    pub register_type: RegisterType,
    pub access: Access,
    /// Number of banks; zero for normal registers.
    pub bank_size: u16,
    /// Address of the selector for banked registers; zero otherwise.
    pub selector_address: u16,
    /// Selector value currently programmed in the MAC (banked and selector registers).
    pub current_selector: Option<u32>,
}

macro_rules! registers {
    ($( $(#[$meta:meta])* $name:ident = $addr:literal, $access:ident, $layout:expr; )*) => {
        $( $(#[$meta])* pub const $name: u16 = $addr; )*

        pub(crate) static REGISTER_TABLE: &[RegisterDescriptor] = &[
            $( RegisterDescriptor {
                address: $addr,
                name: stringify!($name),
                access: Access::$access,
                layout: $layout,
            }, )*
        ];
    };
}

use Layout::{Banked, Normal, Selector};

registers! {
    /// Firmware version, see [`MacVersion`](crate::MacVersion).
    MAC_VER = 0x0000, ReadOnly, Normal;
    MAC_INFO = 0x0001, ReadOnly, Normal;
    MAC_RFT_API_VER = 0x0002, ReadOnly, Normal;
    /// Error latch, cleared by `CMD_CLRERR`.
    MAC_ERROR = 0x0005, ReadOnly, Normal;
    MAC_LAST_ERROR = 0x0006, ReadOnly, Normal;

    HST_PWRMGMT = 0x0200, ReadWrite, Normal;
    HST_CMNDIAGS = 0x0201, ReadWrite, Normal;

    HST_MBP_ADDR = 0x0400, ReadWrite, Normal;
    HST_MBP_DATA = 0x0401, ReadWrite, Normal;

    HST_OEM_ADDR = 0x0500, ReadWrite, Normal;
    HST_OEM_DATA = 0x0501, ReadWrite, Normal;

    HST_GPIO_MSK = 0x0600, ReadWrite, Normal;
    HST_GPIO_VAL = 0x0601, ReadWrite, Normal;

    HST_ANT_CYCLES = 0x0700, ReadWrite, Normal;
    HST_ANT_DESC_SEL = 0x0701, ReadWrite, Selector { bank_size: 16 };
    HST_ANT_DESC_CFG = 0x0702, ReadWrite, Banked { selector: 0x0701 };
    MAC_ANT_DESC_STAT = 0x0703, ReadOnly, Banked { selector: 0x0701 };
    HST_ANT_DESC_PORTDEF = 0x0704, ReadWrite, Banked { selector: 0x0701 };
    HST_ANT_DESC_DWELL = 0x0705, ReadWrite, Banked { selector: 0x0701 };
    HST_ANT_DESC_RFPOWER = 0x0706, ReadWrite, Banked { selector: 0x0701 };
    HST_ANT_DESC_INV_CNT = 0x0707, ReadWrite, Banked { selector: 0x0701 };

    HST_TAGMSK_DESC_SEL = 0x0800, ReadWrite, Selector { bank_size: 8 };
    HST_TAGMSK_DESC_CFG = 0x0801, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_BANK = 0x0802, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_PTR = 0x0803, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_LEN = 0x0804, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_0_3 = 0x0805, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_4_7 = 0x0806, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_8_11 = 0x0807, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_12_15 = 0x0808, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_16_19 = 0x0809, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_20_23 = 0x080A, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_24_27 = 0x080B, ReadWrite, Banked { selector: 0x0800 };
    HST_TAGMSK_28_31 = 0x080C, ReadWrite, Banked { selector: 0x0800 };

    HST_QUERY_CFG = 0x0900, ReadWrite, Normal;
    HST_INV_CFG = 0x0901, ReadWrite, Normal;
    HST_INV_SEL = 0x0902, ReadWrite, Selector { bank_size: 4 };
    HST_INV_ALG_PARM_0 = 0x0903, ReadWrite, Banked { selector: 0x0902 };
    HST_INV_ALG_PARM_1 = 0x0904, ReadWrite, Banked { selector: 0x0902 };
    HST_INV_ALG_PARM_2 = 0x0905, ReadWrite, Banked { selector: 0x0902 };
    HST_INV_EPC_MATCH_CFG = 0x0911, ReadWrite, Normal;
    HST_INV_EPCDAT_0_3 = 0x0912, ReadWrite, Normal;

    HST_TAGACC_DESC_CFG = 0x0A01, ReadWrite, Normal;
    HST_TAGACC_BANK = 0x0A02, ReadWrite, Normal;
    HST_TAGACC_PTR = 0x0A03, ReadWrite, Normal;
    HST_TAGACC_CNT = 0x0A04, ReadWrite, Normal;
    HST_TAGACC_LOCKCFG = 0x0A05, ReadWrite, Normal;
    HST_TAGACC_ACCPWD = 0x0A06, ReadWrite, Normal;
    HST_TAGACC_KILLPWD = 0x0A07, ReadWrite, Normal;
    HST_TAGWRDAT_SEL = 0x0A08, ReadWrite, Selector { bank_size: 8 };
    HST_TAGWRDAT_0 = 0x0A09, ReadWrite, Banked { selector: 0x0A08 };
    HST_TAGQTDAT = 0x0A20, ReadWrite, Normal;

    HST_RFTC_CURRENT_PROFILE = 0x0B60, ReadWrite, Normal;
    HST_RFTC_PROF_SEL = 0x0B61, ReadWrite, Selector { bank_size: 4 };
    MAC_RFTC_PROF_CFG = 0x0B62, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_ID_HIGH = 0x0B63, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_ID_LOW = 0x0B64, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_IDVER = 0x0B65, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_PROTOCOL = 0x0B66, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_TARI = 0x0B68, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_X = 0x0B69, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_PW = 0x0B6A, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_RTCAL = 0x0B6B, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_TRCAL = 0x0B6C, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_DIVIDERATIO = 0x0B6D, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_MILLERNUM = 0x0B6E, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_T2RLINKFREQ = 0x0B6F, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_VART2DELAY = 0x0B70, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_RXDELAY = 0x0B71, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_MINTOTT2DELAY = 0x0B72, ReadOnly, Banked { selector: 0x0B61 };
    MAC_RFTC_PROF_TXPROPDELAY = 0x0B73, ReadOnly, Banked { selector: 0x0B61 };

    HST_LPROF_SEL = 0x0B80, ReadWrite, Normal;
    HST_LPROF_ADDR = 0x0B81, ReadWrite, Normal;
    HST_LPROF_DATA = 0x0B82, ReadWrite, Normal;

    /// Writing a command code here starts a command exchange.
    HST_CMD = 0xF000, WriteOnly, Normal;
}

/// Number of write-data registers in one `HST_TAGWRDAT` bank.
pub const TAGWRDAT_REGISTERS_PER_BANK: usize = 16;
/// Number of post-singulation match data registers starting at `HST_INV_EPCDAT_0_3`.
pub const INV_EPCDAT_REGISTERS: usize = 16;

/// Address of write-data register `index` within the selected `HST_TAGWRDAT` bank.
pub const fn tagwrdat(index: usize) -> u16 {
    HST_TAGWRDAT_0 + index as u16
}

pub(crate) fn descriptor(address: u16) -> Option<&'static RegisterDescriptor> {
    if (HST_TAGWRDAT_0..HST_TAGWRDAT_0 + TAGWRDAT_REGISTERS_PER_BANK as u16).contains(&address) {
        return REGISTER_TABLE.iter().find(|d| d.address == HST_TAGWRDAT_0);
    }
    if (HST_INV_EPCDAT_0_3..HST_INV_EPCDAT_0_3 + INV_EPCDAT_REGISTERS as u16).contains(&address) {
        return REGISTER_TABLE.iter().find(|d| d.address == HST_INV_EPCDAT_0_3);
    }
    REGISTER_TABLE.iter().find(|d| d.address == address)
}

/// Bit-fields of the registers the driver programs.
pub mod fields {
    use super::BitField;

    pub mod mac_ver {
        use super::BitField;
        pub const MAJOR: BitField = BitField::new(24, 8);
        pub const MINOR: BitField = BitField::new(16, 8);
        pub const MAINTENANCE: BitField = BitField::new(8, 8);
        pub const RELEASE: BitField = BitField::new(0, 8);
    }

    pub mod pwrmgmt {
        use super::BitField;
        pub const MODE: BitField = BitField::new(0, 2);
    }

    pub mod ant_cycles {
        use super::BitField;
        pub const CYCLES: BitField = BitField::new(0, 16);
        /// Cycle count meaning "until cancelled".
        pub const CONTINUOUS: u32 = 0xFFFF;
    }

    pub mod ant_desc_cfg {
        use super::BitField;
        pub const ENABLED: BitField = BitField::new(0, 1);
    }

    pub mod ant_desc_stat {
        use super::BitField;
        pub const SENSE_VALUE: BitField = BitField::new(0, 20);
    }

    pub mod ant_desc_portdef {
        use super::BitField;
        pub const TX_PORT: BitField = BitField::new(0, 2);
        pub const RX_PORT: BitField = BitField::new(16, 2);
    }

    pub mod ant_desc_rfpower {
        use super::BitField;
        pub const POWER: BitField = BitField::new(0, 9);
    }

    pub mod tagmsk_desc_cfg {
        use super::BitField;
        pub const ENABLED: BitField = BitField::new(0, 1);
        pub const TARGET: BitField = BitField::new(1, 3);
        pub const ACTION: BitField = BitField::new(4, 3);
        pub const TRUNCATE: BitField = BitField::new(7, 1);
    }

    pub mod tagmsk_len {
        use super::BitField;
        pub const BITS: BitField = BitField::new(0, 8);
    }

    pub mod query_cfg {
        use super::BitField;
        pub const TARGET: BitField = BitField::new(4, 1);
        pub const SESSION: BitField = BitField::new(5, 2);
        pub const SELECT: BitField = BitField::new(7, 2);
    }

    pub mod inv_cfg {
        use super::BitField;
        pub const ALGORITHM: BitField = BitField::new(0, 6);
        /// Tags to singulate before stopping; zero runs until the cycle ends.
        pub const MATCH_REP: BitField = BitField::new(6, 8);
        /// Issue the configured select commands before each inventory round.
        pub const TAG_SEL: BitField = BitField::new(14, 1);
    }

    pub mod inv_alg_parm_0 {
        use super::BitField;
        pub const Q: BitField = BitField::new(0, 4);
        pub const MAX_Q: BitField = BitField::new(4, 4);
        pub const MIN_Q: BitField = BitField::new(8, 4);
        pub const THRESHOLD_MULTIPLIER: BitField = BitField::new(12, 6);
    }

    pub mod inv_alg_parm_1 {
        use super::BitField;
        pub const RETRY: BitField = BitField::new(0, 8);
    }

    pub mod inv_alg_parm_2 {
        use super::BitField;
        pub const TOGGLE: BitField = BitField::new(0, 1);
        pub const REPEAT_UNTIL_NO_TAGS: BitField = BitField::new(1, 1);
    }

    pub mod inv_epc_match_cfg {
        use super::BitField;
        pub const ENABLED: BitField = BitField::new(0, 1);
        /// Match when the EPC differs from the mask instead of when it equals it.
        pub const MISMATCH: BitField = BitField::new(1, 1);
        pub const LENGTH: BitField = BitField::new(2, 9);
        pub const OFFSET: BitField = BitField::new(11, 9);
    }

    pub mod tagacc_desc_cfg {
        use super::BitField;
        pub const VERIFY: BitField = BitField::new(0, 1);
        pub const RETRY: BitField = BitField::new(1, 3);
    }

    pub mod tagacc_bank {
        use super::BitField;
        pub const BANK: BitField = BitField::new(0, 2);
    }

    pub mod tagacc_cnt {
        use super::BitField;
        pub const COUNT: BitField = BitField::new(0, 8);
    }

    pub mod tagacc_lockcfg {
        use super::BitField;
        pub const ACTION: BitField = BitField::new(0, 10);
        pub const MASK: BitField = BitField::new(10, 10);
    }

    pub mod tagwrdat {
        use super::BitField;
        /// Ordinary and random writes: tag word offset.
        pub const OFFSET: BitField = BitField::new(16, 16);
        pub const DATA: BitField = BitField::new(0, 16);
        /// Block writes: first word of the pair.
        pub const DATA_HIGH: BitField = BitField::new(16, 16);
        pub const DATA_LOW: BitField = BitField::new(0, 16);
    }

    pub mod tagqtdat {
        use super::BitField;
        /// Set to write the QT control word, clear to read it.
        pub const WRITE: BitField = BitField::new(0, 1);
        /// Set to make the written setting permanent.
        pub const PERSISTENT: BitField = BitField::new(1, 1);
        pub const SHORT_RANGE: BitField = BitField::new(2, 1);
        /// Set to select the public memory map.
        pub const PUBLIC_MEMORY_MAP: BitField = BitField::new(3, 1);
    }

    pub mod rftc_prof_cfg {
        use super::BitField;
        pub const ACTIVE: BitField = BitField::new(0, 1);
    }

    pub mod lprof {
        use super::BitField;
        pub const SELECTOR: BitField = BitField::new(0, 16);
        pub const ADDRESS: BitField = BitField::new(0, 16);
        pub const DATA: BitField = BitField::new(0, 16);
    }

    pub mod mbp {
        use super::BitField;
        pub const ADDRESS: BitField = BitField::new(0, 16);
        pub const DATA: BitField = BitField::new(0, 16);
    }
}

/// Command codes written to `HST_CMD`.
pub mod commands {
    pub const CMD_NV_MEM_UPDATE: u32 = 0x01;
    pub const CMD_WROEM: u32 = 0x02;
    pub const CMD_RDOEM: u32 = 0x03;
    pub const CMD_MBPRDREG: u32 = 0x05;
    pub const CMD_MBPWRREG: u32 = 0x06;
    pub const CMD_RDGPIO: u32 = 0x0C;
    pub const CMD_WRGPIO: u32 = 0x0D;
    pub const CMD_CFGGPIO: u32 = 0x0E;
    pub const CMD_18K6CINV: u32 = 0x0F;
    pub const CMD_18K6CREAD: u32 = 0x10;
    pub const CMD_18K6CWRITE: u32 = 0x11;
    pub const CMD_18K6CLOCK: u32 = 0x12;
    pub const CMD_18K6CKILL: u32 = 0x13;
    pub const CMD_SETPWRMGMTCFG: u32 = 0x14;
    pub const CMD_CLRERR: u32 = 0x15;
    pub const CMD_UPDATELINKPROFILE: u32 = 0x19;
    pub const CMD_LPROF_RDXCVRREG: u32 = 0x1C;
    pub const CMD_LPROF_WRXCVRREG: u32 = 0x1D;
    pub const CMD_18K6CBLOCKERASE: u32 = 0x1E;
    pub const CMD_18K6CBLOCKWRITE: u32 = 0x1F;
    pub const CMD_18K6CQT: u32 = 0x21;
}

/// MAC error numbers (the `MAC_ERROR` register and `COMMAND_END` status).
pub mod mac_errors {
    pub const NONE: u32 = 0x0000;
    pub const UNKNOWN_COMMAND: u32 = 0x0001;
    pub const REGISTER_ADDRESS: u32 = 0x0002;
    pub const READ_ONLY_REGISTER: u32 = 0x0003;
    pub const SELECTOR_BOUNDS: u32 = 0x0010;
    pub const ANTENNA_PORT_BOUNDS: u32 = 0x0011;
    pub const PROFILE_BOUNDS: u32 = 0x0012;
    pub const GPIO_BOUNDS: u32 = 0x0013;
    pub const OEM_ADDRESS_BOUNDS: u32 = 0x0014;
    pub const VALUE_BOUNDS: u32 = 0x0015;
    pub const NO_ANTENNA_ENABLED: u32 = 0x0020;
    pub const PLL_LOCK_FAILED: u32 = 0x0030;

    /// Errors that reflect a bad host-supplied value rather than a device fault.
    pub const fn is_parameter_error(code: u32) -> bool {
        matches!(
            code,
            REGISTER_ADDRESS
                | READ_ONLY_REGISTER
                | SELECTOR_BOUNDS
                | ANTENNA_PORT_BOUNDS
                | PROFILE_BOUNDS
                | GPIO_BOUNDS
                | OEM_ADDRESS_BOUNDS
                | VALUE_BOUNDS
        )
    }
}
