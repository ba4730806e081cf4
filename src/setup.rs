//! Radio configuration held in MAC registers: banked register access,
//! antenna ports, select and post-match criteria, query and singulation.

use log::debug;

use crate::error::{Error, Result};
use crate::link::MacLink;
use crate::registers::{self, Layout, fields, *};
use crate::transport::MacTransport;
use crate::types::{
    AntennaPortConfig, AntennaPortStatus, LinkProfileInfo, MemoryBank, OperationMode,
    PostMatchCriteria, QueryParams, QuerySel, QuerySession, QueryTarget, SelectAction,
    SelectCriterion, SelectTarget, SingulationAlgorithm,
};

/// Logical antenna ports (banks of `HST_ANT_DESC_SEL`).
pub const ANTENNA_PORTS: u32 = 16;
/// Tag-mask descriptors (banks of `HST_TAGMSK_DESC_SEL`).
pub const MAX_SELECT_CRITERIA: usize = 8;
/// Bytes in one select mask.
pub const SELECT_MASK_BYTES: usize = 32;
/// Link profiles (banks of `HST_RFTC_PROF_SEL`).
pub const LINK_PROFILES: u32 = 4;

const SELECT_MASK_REGISTERS: [u16; 8] = [
    HST_TAGMSK_0_3,
    HST_TAGMSK_4_7,
    HST_TAGMSK_8_11,
    HST_TAGMSK_12_15,
    HST_TAGMSK_16_19,
    HST_TAGMSK_20_23,
    HST_TAGMSK_24_27,
    HST_TAGMSK_28_31,
];

/// Selector and bank count of a banked register.
pub(crate) fn bank_info(address: u16) -> Option<(u16, u16)> {
    let Layout::Banked { selector } = registers::descriptor(address)?.layout else {
        return None;
    };
    match registers::descriptor(selector)?.layout {
        Layout::Selector { bank_size } => Some((selector, bank_size)),
        _ => None,
    }
}

/// Point the selector of `address` at `bank`, refusing out-of-range banks
/// without touching the MAC.
pub(crate) fn select_bank<T: MacTransport>(
    link: &mut MacLink<T>,
    op: &'static str,
    address: u16,
    bank: u32,
) -> Result<()> {
    let (selector, bank_size) = bank_info(address)
        .ok_or_else(|| Error::invalid(op, format!("register 0x{:04X} is not banked", address)))?;
    if bank >= u32::from(bank_size) {
        return Err(Error::invalid(
            op,
            format!(
                "bank {} out of range for register 0x{:04X} ({} banks)",
                bank, address, bank_size
            ),
        ));
    }
    link.write_register(selector, bank)
}

pub(crate) fn read_banked<T: MacTransport>(
    link: &mut MacLink<T>,
    op: &'static str,
    address: u16,
    bank: u32,
) -> Result<u32> {
    select_bank(link, op, address, bank)?;
    link.read_register(address)
}

pub(crate) fn write_banked<T: MacTransport>(
    link: &mut MacLink<T>,
    op: &'static str,
    address: u16,
    bank: u32,
    value: u32,
) -> Result<()> {
    select_bank(link, op, address, bank)?;
    link.write_register(address, value)
}

fn check_port(op: &'static str, port: u32) -> Result<()> {
    if port >= ANTENNA_PORTS {
        return Err(Error::invalid(op, format!("antenna port {} out of range", port)));
    }
    Ok(())
}

pub(crate) fn antenna_port_enabled<T: MacTransport>(link: &mut MacLink<T>, port: u32) -> Result<bool> {
    const OP: &str = "antenna_port_state";
    check_port(OP, port)?;
    let cfg = read_banked(link, OP, HST_ANT_DESC_CFG, port)?;
    Ok(fields::ant_desc_cfg::ENABLED.get_bool(cfg))
}

pub(crate) fn set_antenna_port_enabled<T: MacTransport>(
    link: &mut MacLink<T>,
    port: u32,
    enabled: bool,
) -> Result<()> {
    const OP: &str = "set_antenna_port_state";
    check_port(OP, port)?;
    let cfg = read_banked(link, OP, HST_ANT_DESC_CFG, port)?;
    link.write_register(
        HST_ANT_DESC_CFG,
        fields::ant_desc_cfg::ENABLED.set_bool(cfg, enabled),
    )
}

pub(crate) fn antenna_port_status<T: MacTransport>(
    link: &mut MacLink<T>,
    port: u32,
) -> Result<AntennaPortStatus> {
    const OP: &str = "antenna_port_status";
    check_port(OP, port)?;
    let cfg = read_banked(link, OP, HST_ANT_DESC_CFG, port)?;
    let stat = link.read_register(MAC_ANT_DESC_STAT)?;
    Ok(AntennaPortStatus {
        enabled: fields::ant_desc_cfg::ENABLED.get_bool(cfg),
        sense_value: fields::ant_desc_stat::SENSE_VALUE.get(stat),
    })
}

pub(crate) fn antenna_port_config<T: MacTransport>(
    link: &mut MacLink<T>,
    port: u32,
) -> Result<AntennaPortConfig> {
    use fields::{ant_desc_portdef, ant_desc_rfpower};
    const OP: &str = "antenna_port_config";
    check_port(OP, port)?;
    select_bank(link, OP, HST_ANT_DESC_CFG, port)?;
    let portdef = link.read_register(HST_ANT_DESC_PORTDEF)?;
    let power = link.read_register(HST_ANT_DESC_RFPOWER)?;
    Ok(AntennaPortConfig {
        power: ant_desc_rfpower::POWER.get(power) as u16,
        dwell_time_ms: link.read_register(HST_ANT_DESC_DWELL)?,
        inventory_cycles: link.read_register(HST_ANT_DESC_INV_CNT)?,
        physical_tx_port: ant_desc_portdef::TX_PORT.get(portdef) as u8,
        physical_rx_port: ant_desc_portdef::RX_PORT.get(portdef) as u8,
    })
}

pub(crate) fn set_antenna_port_config<T: MacTransport>(
    link: &mut MacLink<T>,
    port: u32,
    config: &AntennaPortConfig,
) -> Result<()> {
    use fields::{ant_desc_portdef, ant_desc_rfpower};
    const OP: &str = "set_antenna_port_config";
    check_port(OP, port)?;
    if !ant_desc_rfpower::POWER.fits(config.power.into()) {
        return Err(Error::invalid(OP, format!("power {} out of range", config.power)));
    }
    if !ant_desc_portdef::TX_PORT.fits(config.physical_tx_port.into())
        || !ant_desc_portdef::RX_PORT.fits(config.physical_rx_port.into())
    {
        return Err(Error::invalid(OP, "physical port out of range"));
    }

    select_bank(link, OP, HST_ANT_DESC_CFG, port)?;
    let portdef = ant_desc_portdef::RX_PORT.set(
        ant_desc_portdef::TX_PORT.set(0, config.physical_tx_port.into()),
        config.physical_rx_port.into(),
    );
    link.write_register(HST_ANT_DESC_PORTDEF, portdef)?;
    link.write_register(HST_ANT_DESC_DWELL, config.dwell_time_ms)?;
    link.write_register(HST_ANT_DESC_INV_CNT, config.inventory_cycles)?;
    link.write_register(
        HST_ANT_DESC_RFPOWER,
        ant_desc_rfpower::POWER.set(0, config.power.into()),
    )
}

pub(crate) fn operation_mode<T: MacTransport>(link: &mut MacLink<T>) -> Result<OperationMode> {
    use fields::ant_cycles::{CONTINUOUS, CYCLES};
    let cycles = CYCLES.get(link.read_register(HST_ANT_CYCLES)?);
    Ok(if cycles == CONTINUOUS {
        OperationMode::Continuous
    } else {
        OperationMode::NonContinuous
    })
}

pub(crate) fn set_operation_mode<T: MacTransport>(link: &mut MacLink<T>, mode: OperationMode) -> Result<()> {
    use fields::ant_cycles::{CONTINUOUS, CYCLES};
    let current = link.read_register(HST_ANT_CYCLES)?;
    let cycles = match mode {
        OperationMode::Continuous => CONTINUOUS,
        OperationMode::NonContinuous => 1,
    };
    link.write_register(HST_ANT_CYCLES, CYCLES.set(current, cycles))
}

/// Mask bytes packed four per register, first byte in the low bits.
fn pack_mask(mask: &[u8], registers: usize) -> Vec<u32> {
    (0..registers)
        .map(|index| {
            let mut word = [0u8; 4];
            for (slot, byte) in word.iter_mut().zip(mask.iter().skip(index * 4)) {
                *slot = *byte;
            }
            u32::from_le_bytes(word)
        })
        .collect()
}

fn unpack_mask(words: &[u32], bits: u32) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(bits.div_ceil(8) as usize);
    bytes
}

fn check_mask(op: &'static str, mask: &[u8], bits: u32, max_bytes: usize) -> Result<()> {
    if mask.len() > max_bytes {
        return Err(Error::invalid(
            op,
            format!("mask of {} bytes exceeds {}", mask.len(), max_bytes),
        ));
    }
    if bits.div_ceil(8) as usize > mask.len() {
        return Err(Error::invalid(
            op,
            format!("{} mask bits but only {} bytes", bits, mask.len()),
        ));
    }
    Ok(())
}

pub(crate) fn set_select_criteria<T: MacTransport>(
    link: &mut MacLink<T>,
    criteria: &[SelectCriterion],
) -> Result<()> {
    use fields::tagmsk_desc_cfg::*;
    const OP: &str = "set_select_criteria";
    if criteria.len() > MAX_SELECT_CRITERIA {
        return Err(Error::invalid(
            OP,
            format!("{} criteria, at most {}", criteria.len(), MAX_SELECT_CRITERIA),
        ));
    }
    for criterion in criteria {
        check_mask(OP, &criterion.mask, criterion.count.into(), SELECT_MASK_BYTES)?;
    }

    for index in 0..MAX_SELECT_CRITERIA {
        select_bank(link, OP, HST_TAGMSK_DESC_CFG, index as u32)?;
        let Some(criterion) = criteria.get(index) else {
            link.write_register(HST_TAGMSK_DESC_CFG, 0)?;
            continue;
        };
        let mut cfg = ENABLED.set_bool(0, true);
        cfg = TARGET.set(cfg, criterion.target as u32);
        cfg = ACTION.set(cfg, criterion.action as u32);
        cfg = TRUNCATE.set_bool(cfg, criterion.truncate);
        link.write_register(HST_TAGMSK_DESC_CFG, cfg)?;
        link.write_register(HST_TAGMSK_BANK, criterion.bank as u32)?;
        link.write_register(HST_TAGMSK_PTR, criterion.offset)?;
        link.write_register(HST_TAGMSK_LEN, criterion.count.into())?;
        for (register, word) in SELECT_MASK_REGISTERS
            .iter()
            .zip(pack_mask(&criterion.mask, SELECT_MASK_REGISTERS.len()))
        {
            link.write_register(*register, word)?;
        }
    }
    debug!("Programmed {} select criteria", criteria.len());
    Ok(())
}

pub(crate) fn select_criteria<T: MacTransport>(link: &mut MacLink<T>) -> Result<Vec<SelectCriterion>> {
    use fields::tagmsk_desc_cfg::*;
    const OP: &str = "select_criteria";
    let mut criteria = Vec::new();
    for index in 0..MAX_SELECT_CRITERIA {
        let cfg = read_banked(link, OP, HST_TAGMSK_DESC_CFG, index as u32)?;
        if !ENABLED.get_bool(cfg) {
            continue;
        }
        let count = fields::tagmsk_len::BITS.get(link.read_register(HST_TAGMSK_LEN)?);
        let mut words = Vec::with_capacity(SELECT_MASK_REGISTERS.len());
        for register in SELECT_MASK_REGISTERS {
            words.push(link.read_register(register)?);
        }
        criteria.push(SelectCriterion {
            bank: MemoryBank::from_bits(link.read_register(HST_TAGMSK_BANK)?),
            offset: link.read_register(HST_TAGMSK_PTR)?,
            count: count as u8,
            mask: unpack_mask(&words, count),
            target: SelectTarget::from_bits(TARGET.get(cfg)),
            action: SelectAction::from_bits(ACTION.get(cfg)),
            truncate: TRUNCATE.get_bool(cfg),
        });
    }
    Ok(criteria)
}

pub(crate) fn set_post_match_criteria<T: MacTransport>(
    link: &mut MacLink<T>,
    criteria: &PostMatchCriteria,
) -> Result<()> {
    use fields::inv_epc_match_cfg::*;
    const OP: &str = "set_post_match_criteria";
    if !LENGTH.fits(criteria.count.into()) || !OFFSET.fits(criteria.offset.into()) {
        return Err(Error::invalid(OP, "match offset or length out of range"));
    }
    check_mask(
        OP,
        &criteria.mask,
        criteria.count.into(),
        INV_EPCDAT_REGISTERS * 4,
    )?;

    let current = link.read_register(HST_INV_EPC_MATCH_CFG)?;
    let mut cfg = MISMATCH.set_bool(current, criteria.match_on_mismatch);
    cfg = LENGTH.set(cfg, criteria.count.into());
    cfg = OFFSET.set(cfg, criteria.offset.into());
    link.write_register(HST_INV_EPC_MATCH_CFG, cfg)?;
    for (index, word) in pack_mask(&criteria.mask, INV_EPCDAT_REGISTERS)
        .into_iter()
        .enumerate()
    {
        link.write_register(HST_INV_EPCDAT_0_3 + index as u16, word)?;
    }
    Ok(())
}

pub(crate) fn post_match_criteria<T: MacTransport>(link: &mut MacLink<T>) -> Result<PostMatchCriteria> {
    use fields::inv_epc_match_cfg::*;
    let cfg = link.read_register(HST_INV_EPC_MATCH_CFG)?;
    let count = LENGTH.get(cfg);
    let mut words = Vec::with_capacity(INV_EPCDAT_REGISTERS);
    for index in 0..INV_EPCDAT_REGISTERS {
        words.push(link.read_register(HST_INV_EPCDAT_0_3 + index as u16)?);
    }
    Ok(PostMatchCriteria {
        match_on_mismatch: MISMATCH.get_bool(cfg),
        offset: OFFSET.get(cfg) as u16,
        count: count as u16,
        mask: unpack_mask(&words, count),
    })
}

pub(crate) fn query_params<T: MacTransport>(link: &mut MacLink<T>) -> Result<QueryParams> {
    use fields::query_cfg::*;
    let cfg = link.read_register(HST_QUERY_CFG)?;
    Ok(QueryParams {
        target: if TARGET.get_bool(cfg) { QueryTarget::B } else { QueryTarget::A },
        session: match SESSION.get(cfg) {
            0 => QuerySession::S0,
            1 => QuerySession::S1,
            2 => QuerySession::S2,
            _ => QuerySession::S3,
        },
        sel: match SELECT.get(cfg) {
            2 => QuerySel::NotSl,
            3 => QuerySel::Sl,
            _ => QuerySel::All,
        },
    })
}

pub(crate) fn set_query_params<T: MacTransport>(link: &mut MacLink<T>, params: &QueryParams) -> Result<()> {
    use fields::query_cfg::*;
    let current = link.read_register(HST_QUERY_CFG)?;
    let mut cfg = TARGET.set(current, params.target as u32);
    cfg = SESSION.set(cfg, params.session as u32);
    cfg = SELECT.set(cfg, params.sel as u32);
    link.write_register(HST_QUERY_CFG, cfg)
}

fn check_q(op: &'static str, name: &str, q: u8) -> Result<()> {
    if !fields::inv_alg_parm_0::Q.fits(q.into()) {
        return Err(Error::invalid(op, format!("{} {} exceeds 15", name, q)));
    }
    Ok(())
}

pub(crate) fn set_singulation_algorithm<T: MacTransport>(
    link: &mut MacLink<T>,
    algorithm: &SingulationAlgorithm,
) -> Result<()> {
    use fields::{inv_alg_parm_0 as parm0, inv_alg_parm_1 as parm1, inv_alg_parm_2 as parm2};
    const OP: &str = "set_singulation_algorithm";

    let (p0, p1, p2) = match *algorithm {
        SingulationAlgorithm::FixedQ {
            q,
            retry_count,
            toggle_target,
            repeat_until_no_tags,
        } => {
            check_q(OP, "q", q)?;
            (
                parm0::Q.set(0, q.into()),
                parm1::RETRY.set(0, retry_count.into()),
                parm2::REPEAT_UNTIL_NO_TAGS
                    .set_bool(parm2::TOGGLE.set_bool(0, toggle_target), repeat_until_no_tags),
            )
        }
        SingulationAlgorithm::DynamicQ {
            start_q,
            min_q,
            max_q,
            threshold_multiplier,
            retry_count,
            toggle_target,
        } => {
            check_q(OP, "start q", start_q)?;
            check_q(OP, "min q", min_q)?;
            check_q(OP, "max q", max_q)?;
            if !(min_q <= start_q && start_q <= max_q) {
                return Err(Error::invalid(
                    OP,
                    format!("q range {}..={} does not contain {}", min_q, max_q, start_q),
                ));
            }
            if !parm0::THRESHOLD_MULTIPLIER.fits(threshold_multiplier.into()) {
                return Err(Error::invalid(OP, "threshold multiplier exceeds 63"));
            }
            let mut p0 = parm0::Q.set(0, start_q.into());
            p0 = parm0::MIN_Q.set(p0, min_q.into());
            p0 = parm0::MAX_Q.set(p0, max_q.into());
            p0 = parm0::THRESHOLD_MULTIPLIER.set(p0, threshold_multiplier.into());
            (
                p0,
                parm1::RETRY.set(0, retry_count.into()),
                parm2::TOGGLE.set_bool(0, toggle_target),
            )
        }
    };

    let code = algorithm.code();
    write_banked(link, OP, HST_INV_ALG_PARM_0, code, p0)?;
    link.write_register(HST_INV_ALG_PARM_1, p1)?;
    link.write_register(HST_INV_ALG_PARM_2, p2)?;

    let inv_cfg = link.read_register(HST_INV_CFG)?;
    link.write_register(
        HST_INV_CFG,
        fields::inv_cfg::ALGORITHM.set(inv_cfg, code),
    )
}

pub(crate) fn singulation_algorithm<T: MacTransport>(link: &mut MacLink<T>) -> Result<SingulationAlgorithm> {
    use fields::{inv_alg_parm_0 as parm0, inv_alg_parm_1 as parm1, inv_alg_parm_2 as parm2};
    const OP: &str = "singulation_algorithm";

    let code = fields::inv_cfg::ALGORITHM.get(link.read_register(HST_INV_CFG)?);
    if code != SingulationAlgorithm::FIXED_Q && code != SingulationAlgorithm::DYNAMIC_Q {
        return Err(Error::new(
            crate::error::ErrorKind::NotSupported,
            OP,
            format!("singulation algorithm {}", code),
        ));
    }
    let p0 = read_banked(link, OP, HST_INV_ALG_PARM_0, code)?;
    let p1 = link.read_register(HST_INV_ALG_PARM_1)?;
    let p2 = link.read_register(HST_INV_ALG_PARM_2)?;

    let retry_count = parm1::RETRY.get(p1) as u8;
    let toggle_target = parm2::TOGGLE.get_bool(p2);
    Ok(if code == SingulationAlgorithm::FIXED_Q {
        SingulationAlgorithm::FixedQ {
            q: parm0::Q.get(p0) as u8,
            retry_count,
            toggle_target,
            repeat_until_no_tags: parm2::REPEAT_UNTIL_NO_TAGS.get_bool(p2),
        }
    } else {
        SingulationAlgorithm::DynamicQ {
            start_q: parm0::Q.get(p0) as u8,
            min_q: parm0::MIN_Q.get(p0) as u8,
            max_q: parm0::MAX_Q.get(p0) as u8,
            threshold_multiplier: parm0::THRESHOLD_MULTIPLIER.get(p0) as u8,
            retry_count,
            toggle_target,
        }
    })
}

pub(crate) fn check_profile(op: &'static str, profile: u32) -> Result<()> {
    if profile >= LINK_PROFILES {
        return Err(Error::invalid(op, format!("link profile {} out of range", profile)));
    }
    Ok(())
}

pub(crate) fn link_profile_info<T: MacTransport>(
    link: &mut MacLink<T>,
    profile: u32,
) -> Result<LinkProfileInfo> {
    const OP: &str = "link_profile_info";
    check_profile(OP, profile)?;
    let cfg = read_banked(link, OP, MAC_RFTC_PROF_CFG, profile)?;
    let id_high = link.read_register(MAC_RFTC_PROF_ID_HIGH)?;
    let id_low = link.read_register(MAC_RFTC_PROF_ID_LOW)?;
    let mut read = |address: u16| link.read_register(address);
    Ok(LinkProfileInfo {
        enabled: fields::rftc_prof_cfg::ACTIVE.get_bool(cfg),
        profile_id: (u64::from(id_high) << 32) | u64::from(id_low),
        profile_version: read(MAC_RFTC_PROF_IDVER)?,
        protocol: read(MAC_RFTC_PROF_PROTOCOL)?,
        tari: read(MAC_RFTC_PROF_TARI)?,
        x: read(MAC_RFTC_PROF_X)?,
        pw: read(MAC_RFTC_PROF_PW)?,
        rtcal: read(MAC_RFTC_PROF_RTCAL)?,
        trcal: read(MAC_RFTC_PROF_TRCAL)?,
        divide_ratio: read(MAC_RFTC_PROF_DIVIDERATIO)?,
        miller_number: read(MAC_RFTC_PROF_MILLERNUM)?,
        t2r_link_frequency: read(MAC_RFTC_PROF_T2RLINKFREQ)?,
        var_t2_delay: read(MAC_RFTC_PROF_VART2DELAY)?,
        rx_delay: read(MAC_RFTC_PROF_RXDELAY)?,
        min_total_t2_delay: read(MAC_RFTC_PROF_MINTOTT2DELAY)?,
        tx_propagation_delay: read(MAC_RFTC_PROF_TXPROPDELAY)?,
    })
}
