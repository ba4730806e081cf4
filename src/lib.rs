//! Host driver for Indy RFID reader MAC firmware.
//!
//! The MAC is driven through a virtual register file and a packet stream.
//! Register accesses are fixed 8-byte requests; commands are started by
//! writing `HST_CMD` and answered with a `COMMAND_BEGIN` / payload /
//! `COMMAND_END` packet exchange. Tag operations stream packets to a
//! caller-supplied callback and can be cancelled or aborted from another
//! thread.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use indy_mac::{InventoryParams, PacketAction, Radio, SerialTransport};
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 115200)?;
//! let radio = Radio::open(transport)?;
//! println!("MAC firmware {}", radio.mac_version());
//!
//! radio.inventory(&InventoryParams::default(), |packet| {
//!     if let Some(tag) = packet.inventory() {
//!         println!("Found tag: {}", tag.epc_hex());
//!     }
//!     PacketAction::Continue
//! })?;
//! ```

mod bits;
mod config;
mod coordinator;
mod error;
mod exchange;
mod link;
mod nvupdate;
mod packet;
mod radio;
pub mod registers;
mod setup;
mod tag;
mod transport;
mod types;

#[cfg(test)]
mod mock;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use bits::BitField;
pub use config::RadioConfig;
pub use error::{Error, ErrorKind, Result};
pub use packet::{
    BypassRegisterRecord, COMMON_HEADER_LEN, CommandBegin, CommandEnd, InventoryRecord,
    LinkProfileRegisterRecord, NvUpdateConfigRecord, OemConfigRecord, Packet, PacketHeader,
    PacketType, TagAccessRecord, encode as encode_packet,
};
pub use radio::{GPIO_PINS, Radio};
pub use registers::{Access, RegisterInfo, RegisterType};
pub use setup::{ANTENNA_PORTS, LINK_PROFILES, MAX_SELECT_CRITERIA, SELECT_MASK_BYTES};
pub use tag::{
    BlockEraseParams, BlockWriteParams, CommonParams, InventoryParams, KillParams, LockParams,
    LockPermission, MAX_WRITE_REGISTERS, QtParams, ReadParams, WriteData, WriteParams,
};
pub use transport::{MacTransport, ResetKind, TransportCharacteristics};
pub use types::{
    AntennaPortConfig, AntennaPortStatus, LinkProfileInfo, MacVersion, MemoryBank, NvMemBlock,
    OperationMode, OperationOutcome, PacketAction, PostMatchCriteria, PowerState, QueryParams,
    QuerySel, QuerySession, QueryTarget, SelectAction, SelectCriterion, SelectTarget,
    SingulationAlgorithm,
};

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Script, SimulatedMac, packets};
    use crate::registers::commands::*;
    use crate::registers::mac_errors;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const EPC: [u8; 12] = [0xE2, 0x00, 0x68, 0x94, 0x00, 0x00, 0x50, 0x12, 0x34, 0x56, 0x78, 0x9A];

    fn fast() -> RadioConfig {
        RadioConfig::default()
            .poll_interval(Duration::from_millis(1))
            .responsiveness_timeout(Some(Duration::from_secs(2)))
    }

    fn open(mac: &SimulatedMac) -> Radio<SimulatedMac> {
        Radio::with_config(mac.clone(), fast()).unwrap()
    }

    fn stream_until_cancel(mac: &SimulatedMac) {
        mac.script(
            CMD_18K6CINV,
            Script::new(vec![packets::begin(CMD_18K6CINV), packets::inventory(&EPC)])
                .after_cancel(vec![packets::inventory(&EPC), packets::end(0)]),
        );
    }

    #[test]
    fn open_reads_firmware_version() {
        let mac = SimulatedMac::new();
        mac.set_register(registers::MAC_VER, 0x0204_0103);
        let radio = open(&mac);
        assert_eq!(radio.mac_version().to_string(), "2.4.1.3");
        assert!(!radio.is_busy());
    }

    #[test]
    fn register_round_trip() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        radio.write_mac_register(registers::HST_QUERY_CFG, 0x1234).unwrap();
        assert_eq!(radio.read_mac_register(registers::HST_QUERY_CFG).unwrap(), 0x1234);

        // Requests are little-endian: access, address, value.
        let written = mac.written();
        assert_eq!(written[1], vec![0x01, 0x00, 0x00, 0x09, 0x34, 0x12, 0x00, 0x00]);
        assert_eq!(written[2], vec![0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn register_access_rules() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);
        let before = mac.written().len();

        let err = radio.write_mac_register(registers::HST_CMD, CMD_18K6CINV).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = radio.write_mac_register(registers::MAC_VER, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = radio.read_mac_register(registers::HST_CMD).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        assert_eq!(mac.written().len(), before);
        assert!(mac.commands().is_empty());
    }

    #[test]
    fn banked_bounds_are_checked_before_access() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);
        let before = mac.written().len();

        let err = radio
            .read_banked_register(registers::HST_ANT_DESC_CFG, ANTENNA_PORTS)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = radio
            .write_banked_register(registers::HST_TAGMSK_PTR, 8, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(mac.written().len(), before);
    }

    #[test]
    fn banked_register_info_reports_selector() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        radio
            .write_banked_register(registers::HST_ANT_DESC_DWELL, 3, 2000)
            .unwrap();
        assert_eq!(
            radio.read_banked_register(registers::HST_ANT_DESC_DWELL, 3).unwrap(),
            2000
        );
        assert_eq!(mac.with(|s| s.register(registers::HST_ANT_DESC_DWELL, 3)), 2000);

        let info = radio.read_mac_register_info(registers::HST_ANT_DESC_DWELL).unwrap();
        assert_eq!(info.register_type, RegisterType::Banked);
        assert_eq!(info.selector_address, registers::HST_ANT_DESC_SEL);
        assert_eq!(info.bank_size, 16);
        assert_eq!(info.current_selector, Some(3));

        let info = radio.read_mac_register_info(registers::HST_ANT_DESC_SEL).unwrap();
        assert_eq!(info.register_type, RegisterType::Selector);
        assert_eq!(info.bank_size, 16);

        let err = radio.read_mac_register_info(0x7FFF).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn oem_bypass_and_link_profile_registers() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        radio.write_oem_config(0x80, 0xDEAD_BEEF).unwrap();
        assert_eq!(radio.read_oem_config(0x80).unwrap(), 0xDEAD_BEEF);

        radio.write_bypass_register(0x0C, 0x1F).unwrap();
        assert_eq!(radio.read_bypass_register(0x0C).unwrap(), 0x1F);

        radio.write_link_profile_register(2, 0x0450, 0x00AB).unwrap();
        assert_eq!(radio.read_link_profile_register(2, 0x0450).unwrap(), 0x00AB);
        let err = radio.read_link_profile_register(4, 0x0450).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        assert_eq!(
            mac.commands(),
            vec![
                CMD_WROEM,
                CMD_RDOEM,
                CMD_MBPWRREG,
                CMD_MBPRDREG,
                CMD_LPROF_WRXCVRREG,
                CMD_LPROF_RDXCVRREG
            ]
        );
    }

    #[test]
    fn gpio_masks_pins() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        radio.configure_gpio(0b0011, 0b0011).unwrap();
        radio.write_gpio(0b0011, 0b0001).unwrap();
        assert_eq!(radio.read_gpio(0b1111).unwrap(), 0b0001);
        assert_eq!(mac.with(|s| s.gpio_config), 0b0011);

        let err = radio.write_gpio(0b1_0000, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn link_profile_and_power_state() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        radio.set_current_link_profile(1).unwrap();
        assert_eq!(radio.current_link_profile().unwrap(), 1);
        let err = radio.set_current_link_profile(LINK_PROFILES).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        radio.set_power_state(PowerState::Standby).unwrap();
        assert_eq!(radio.power_state().unwrap(), PowerState::Standby);
        assert_eq!(mac.commands(), vec![CMD_UPDATELINKPROFILE, CMD_SETPWRMGMTCFG]);
    }

    #[test]
    fn mac_error_status_clears_latch() {
        let mac = SimulatedMac::new();
        mac.set_register(registers::MAC_ERROR, mac_errors::PLL_LOCK_FAILED);
        mac.script(
            CMD_SETPWRMGMTCFG,
            Script::new(vec![
                packets::begin(CMD_SETPWRMGMTCFG),
                packets::end(mac_errors::PLL_LOCK_FAILED),
            ]),
        );
        let radio = open(&mac);

        let err = radio.set_power_state(PowerState::Full).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RadioFailure);
        assert_eq!(err.operation(), "set_power_state");
        assert_eq!(radio.mac_error().unwrap(), 0);
        assert_eq!(mac.commands(), vec![CMD_SETPWRMGMTCFG, CMD_CLRERR]);
        assert_eq!(mac.with(|s| s.aborts), 1);
    }

    #[test]
    fn inventory_streams_every_packet() {
        let mac = SimulatedMac::new();
        mac.script(
            CMD_18K6CINV,
            Script::new(vec![
                packets::begin(CMD_18K6CINV),
                packets::debug(b"round"),
                packets::inventory(&EPC),
                packets::inventory(&EPC),
                packets::end(0),
            ]),
        );
        let radio = open(&mac);

        let mut seen = Vec::new();
        let mut epcs = Vec::new();
        let params = InventoryParams {
            common: CommonParams {
                stop_count: 2,
                ..CommonParams::default()
            },
        };
        let outcome = radio
            .inventory(&params, |packet| {
                seen.push(packet.packet_type());
                if let Some(tag) = packet.inventory() {
                    epcs.push(tag.epc().to_vec());
                }
                PacketAction::Continue
            })
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(
            seen,
            vec![
                PacketType::CommandBegin,
                PacketType::Inventory,
                PacketType::Inventory,
                PacketType::CommandEnd
            ]
        );
        assert_eq!(epcs, vec![EPC.to_vec(), EPC.to_vec()]);
        let inv_cfg = mac.with(|s| s.register(registers::HST_INV_CFG, 0));
        assert_eq!(registers::fields::inv_cfg::MATCH_REP.get(inv_cfg), 2);
    }

    #[test]
    fn tag_read_delivers_access_data() {
        let mac = SimulatedMac::new();
        mac.script(
            CMD_18K6CREAD,
            Script::new(vec![
                packets::begin(CMD_18K6CREAD),
                packets::inventory(&EPC),
                packets::tag_access(0xC2, false, &[0x12, 0x34, 0x56, 0x78]),
                packets::end(0),
            ]),
        );
        let radio = open(&mac);

        let params = ReadParams {
            common: CommonParams::default(),
            bank: MemoryBank::Tid,
            offset: 0,
            count: 2,
            access_password: 0,
        };
        let mut data = Vec::new();
        let outcome = radio
            .tag_read(&params, |packet| {
                if let Some(access) = packet.tag_access() {
                    data.extend_from_slice(access.data);
                }
                PacketAction::Continue
            })
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Completed);
        assert_eq!(data, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(mac.with(|s| s.register(registers::HST_TAGACC_CNT, 0)), 2);
    }

    #[test]
    fn operations_from_callback_are_busy() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        let mut nested = None;
        let mut writes = (0, 0);
        radio
            .inventory(&InventoryParams::default(), |packet| {
                if packet.packet_type() == PacketType::CommandBegin {
                    writes.0 = mac.written().len();
                    nested = Some(radio.write_mac_register(registers::HST_CMD, CMD_18K6CINV));
                    writes.1 = mac.written().len();
                }
                PacketAction::Continue
            })
            .unwrap();

        assert_eq!(nested.unwrap().unwrap_err().kind(), ErrorKind::RadioBusy);
        assert_eq!(writes.0, writes.1);
        assert!(!radio.is_busy());
    }

    #[test]
    fn cancel_from_callback_thread_is_not_allowed() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);

        let mut attempt = None;
        radio
            .inventory(&InventoryParams::default(), |packet| {
                if packet.packet_type() == PacketType::CommandBegin {
                    attempt = Some(radio.cancel_operation());
                }
                PacketAction::Continue
            })
            .unwrap();

        let err = attempt.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CurrentlyNotAllowed);
    }

    #[test]
    fn callback_cancel_finishes_the_command() {
        let mac = SimulatedMac::new();
        stream_until_cancel(&mac);
        let radio = open(&mac);

        let mut tags = 0;
        let outcome = radio
            .inventory(&InventoryParams::default(), |packet| {
                if packet.inventory().is_some() {
                    tags += 1;
                    return PacketAction::Cancel;
                }
                PacketAction::Continue
            })
            .unwrap();

        assert_eq!(outcome, OperationOutcome::Cancelled);
        // The packet released by the cancel is still delivered.
        assert_eq!(tags, 2);
        assert_eq!(mac.with(|s| s.cancels), 1);
    }

    #[test]
    fn cancel_from_another_thread() {
        let mac = SimulatedMac::new();
        stream_until_cancel(&mac);
        let radio = open(&mac);
        let radio = &radio;
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let worker = s.spawn(move || {
                let mut tags = 0;
                let outcome = radio.inventory(&InventoryParams::default(), |packet| {
                    if packet.inventory().is_some() {
                        tags += 1;
                        let _ = tx.send(());
                    }
                    PacketAction::Continue
                });
                (outcome, tags)
            });

            rx.recv().unwrap();
            radio.cancel_operation().unwrap();
            // Cancel returns only once the operation has drained.
            let (outcome, tags) = worker.join().unwrap();
            assert_eq!(outcome.unwrap(), OperationOutcome::Cancelled);
            assert_eq!(tags, 2);
        });

        assert!(!radio.is_busy());
        assert_eq!(mac.with(|s| s.cancels), 1);
    }

    #[test]
    fn cancel_while_programming_waits_for_the_operation() {
        let mac = SimulatedMac::new();
        stream_until_cancel(&mac);
        let radio = open(&mac);
        let radio = &radio;
        // Programming reads HST_INV_CFG back, so this stalls it.
        mac.delay_responses(Duration::from_millis(200));

        thread::scope(|s| {
            let worker = s.spawn(move || {
                radio.inventory(&InventoryParams::default(), |_| PacketAction::Continue)
            });

            let deadline = Instant::now() + Duration::from_secs(2);
            while !radio.is_busy() {
                assert!(Instant::now() < deadline, "inventory never started");
                thread::yield_now();
            }
            radio.cancel_operation().unwrap();
            assert!(!radio.is_busy());
            assert_eq!(worker.join().unwrap().unwrap(), OperationOutcome::Cancelled);
        });

        assert_eq!(mac.with(|s| s.cancels), 1);
        assert_eq!(mac.commands(), vec![CMD_18K6CINV]);
    }

    #[test]
    fn abort_from_another_thread() {
        let mac = SimulatedMac::new();
        mac.script(
            CMD_18K6CINV,
            Script::new(vec![packets::begin(CMD_18K6CINV), packets::inventory(&EPC)]),
        );
        let radio = open(&mac);
        let radio = &radio;
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let worker = s.spawn(move || {
                radio.inventory(&InventoryParams::default(), |packet| {
                    if packet.inventory().is_some() {
                        let _ = tx.send(());
                    }
                    PacketAction::Continue
                })
            });

            rx.recv().unwrap();
            radio.abort_operation().unwrap();
            assert_eq!(worker.join().unwrap().unwrap(), OperationOutcome::Aborted);
        });

        assert_eq!(mac.with(|s| s.aborts), 1);
        // The radio is usable again.
        assert_eq!(radio.read_mac_register(registers::MAC_VER).unwrap(), 0x0205_0000);
    }

    #[test]
    fn cancel_without_operation_is_a_no_op() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);
        radio.cancel_operation().unwrap();
        radio.abort_operation().unwrap();
        assert_eq!(mac.with(|s| (s.cancels, s.aborts)), (0, 0));
    }

    #[test]
    fn stall_is_reported_on_current_firmware() {
        let mac = SimulatedMac::new();
        let config = fast().responsiveness_timeout(Some(Duration::from_millis(30)));
        let radio = Radio::with_config(mac.clone(), config).unwrap();

        mac.delay_responses(Duration::from_millis(300));
        let err = radio.read_mac_register(registers::HST_QUERY_CFG).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RadioNotResponding);
    }

    #[test]
    fn stall_is_tolerated_on_legacy_firmware() {
        let mac = SimulatedMac::new();
        mac.set_register(registers::MAC_VER, 0x0203_0000);
        let config = fast().responsiveness_timeout(Some(Duration::from_millis(30)));
        let radio = Radio::with_config(mac.clone(), config).unwrap();
        assert!(radio.mac_version().is_pre_2_4());

        mac.delay_responses(Duration::from_millis(120));
        assert_eq!(radio.read_mac_register(registers::HST_QUERY_CFG).unwrap(), 0);
    }

    #[test]
    fn legacy_override_disables_stall_check() {
        let mac = SimulatedMac::new();
        let config = fast()
            .responsiveness_timeout(Some(Duration::from_millis(30)))
            .legacy_firmware(true);
        let radio = Radio::with_config(mac.clone(), config).unwrap();

        mac.delay_responses(Duration::from_millis(120));
        assert!(radio.read_mac_register(registers::HST_QUERY_CFG).is_ok());
    }

    #[test]
    fn nonvolatile_update_through_radio() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);
        let image = [0xA5u8; 64];

        radio
            .update_nonvolatile_memory(&[NvMemBlock { address: 0x0001_0000, data: &image }], false)
            .unwrap();
        // One range packet and the completion packet.
        assert_eq!(mac.with(|s| s.nv_packets.len()), 2);
        assert!(!mac.with(|s| s.nv_mode));
        assert!(!radio.is_busy());

        let err = radio.update_nonvolatile_memory(&[], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn reset_is_forwarded() {
        let mac = SimulatedMac::new();
        let radio = open(&mac);
        radio.reset(ResetKind::Soft).unwrap();
        assert_eq!(mac.with(|s| s.resets.clone()), vec![ResetKind::Soft]);
    }
}
