use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::info;

use crate::config::RadioConfig;
use crate::coordinator::{CancelCoordinator, Request};
use crate::error::{Error, ErrorKind, Result};
use crate::exchange::{self, Expected, PacketCallback, Response};
use crate::link::MacLink;
use crate::nvupdate;
use crate::packet::Packet;
use crate::registers::{self, Layout, RegisterInfo, RegisterType, commands::*, fields};
use crate::setup;
use crate::tag::{
    BlockEraseParams, BlockWriteParams, InventoryParams, KillParams, LockParams, QtParams,
    ReadParams, TagOperation, WriteParams,
};
use crate::transport::{MacTransport, ResetKind, TransportCharacteristics};
use crate::types::{
    AntennaPortConfig, AntennaPortStatus, LinkProfileInfo, MacVersion, NvMemBlock,
    OperationMode, OperationOutcome, PacketAction, PostMatchCriteria, PowerState, QueryParams,
    SelectCriterion, SingulationAlgorithm,
};

/// Number of GPIO pins the MAC exposes.
pub const GPIO_PINS: u32 = 4;
const GPIO_PIN_MASK: u32 = (1 << GPIO_PINS) - 1;

/// Clears the busy flag when the operation that claimed it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A session with one RFID MAC.
///
/// Every operation takes `&self`; only one runs at a time; a second caller
/// gets [`ErrorKind::RadioBusy`]. [`cancel_operation`](Self::cancel_operation)
/// and [`abort_operation`](Self::abort_operation) are the exception and are
/// meant to be called from another thread while a tag operation runs.
pub struct Radio<T: MacTransport> {
    link: Mutex<MacLink<T>>,
    busy: AtomicBool,
    coordinator: CancelCoordinator,
    version: MacVersion,
    characteristics: TransportCharacteristics,
}

impl<T: MacTransport> Radio<T> {
    /// Open a radio with the default [`RadioConfig`].
    pub fn open(transport: T) -> Result<Self> {
        Self::with_config(transport, RadioConfig::default())
    }

    /// Open a radio, reading the firmware version to decide whether the
    /// responsiveness timeout applies.
    pub fn with_config(transport: T, config: RadioConfig) -> Result<Self> {
        let mut link = MacLink::new(transport, &config);
        let version = MacVersion::from_register(link.read_register(registers::MAC_VER)?);
        let legacy = config
            .legacy_override()
            .unwrap_or_else(|| version.is_pre_2_4());
        link.set_legacy_firmware(legacy);

        let characteristics = link.characteristics();
        info!(
            "Opened MAC firmware {} (driver {}, max packet {} bytes){}",
            version,
            characteristics.driver_version,
            characteristics.max_packet_size,
            if legacy { ", responsiveness timeout disabled" } else { "" }
        );

        Ok(Self {
            link: Mutex::new(link),
            busy: AtomicBool::new(false),
            coordinator: CancelCoordinator::default(),
            version,
            characteristics,
        })
    }

    /// Firmware version read when the radio was opened
    pub fn mac_version(&self) -> MacVersion {
        self.version
    }

    /// Transport properties reported when the radio was opened
    pub fn characteristics(&self) -> TransportCharacteristics {
        self.characteristics
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn lock_link(&self) -> MutexGuard<'_, MacLink<T>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, op: &'static str) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::new(ErrorKind::RadioBusy, op, "another operation is in flight"))?;
        Ok(BusyGuard(&self.busy))
    }

    /// Run `f` with exclusive use of the MAC.
    fn with_link<R>(&self, op: &'static str, f: impl FnOnce(&mut MacLink<T>) -> Result<R>) -> Result<R> {
        let _busy = self.claim(op)?;
        let mut link = self.lock_link();
        f(&mut *link)
    }

    // Registers

    /// Read a MAC register.
    pub fn read_mac_register(&self, address: u16) -> Result<u32> {
        const OP: &str = "read_mac_register";
        self.with_link(OP, |link| {
            if let Some(d) = registers::descriptor(address) {
                if !d.access.readable() {
                    return Err(Error::invalid(OP, format!("{} is write-only", d.name)));
                }
            }
            link.read_register(address)
        })
    }

    /// Write a MAC register.
    ///
    /// Read-only registers and `HST_CMD` are refused; commands are only issued
    /// through the operations of this type.
    pub fn write_mac_register(&self, address: u16, value: u32) -> Result<()> {
        const OP: &str = "write_mac_register";
        self.with_link(OP, |link| {
            if address == registers::HST_CMD {
                return Err(Error::invalid(OP, "HST_CMD is reserved for command exchanges"));
            }
            if let Some(d) = registers::descriptor(address) {
                if !d.access.writable() {
                    return Err(Error::invalid(OP, format!("{} is read-only", d.name)));
                }
            }
            link.write_register(address, value)
        })
    }

    /// Describe a register, including the selector value currently programmed.
    pub fn read_mac_register_info(&self, address: u16) -> Result<RegisterInfo> {
        const OP: &str = "read_mac_register_info";
        self.with_link(OP, |link| {
            let d = registers::descriptor(address).ok_or_else(|| {
                Error::invalid(OP, format!("unknown register 0x{:04X}", address))
            })?;
            let mut info = RegisterInfo {
                address,
                name: d.name,
                register_type: RegisterType::Normal,
                access: d.access,
                bank_size: 0,
                selector_address: 0,
                current_selector: None,
            };
            match d.layout {
                Layout::Normal => {}
                Layout::Selector { bank_size } => {
                    info.register_type = RegisterType::Selector;
                    info.bank_size = bank_size;
                    info.current_selector = Some(link.read_register(address)?);
                }
                Layout::Banked { selector } => {
                    // The bank size lives on the selector.
                    let bank_size = match registers::descriptor(selector).map(|s| s.layout) {
                        Some(Layout::Selector { bank_size }) => bank_size,
                        _ => {
                            return Err(Error::new(
                                ErrorKind::Failure,
                                OP,
                                format!("0x{:04X} is not a selector", selector),
                            ));
                        }
                    };
                    info.register_type = RegisterType::Banked;
                    info.bank_size = bank_size;
                    info.selector_address = selector;
                    info.current_selector = Some(link.read_register(selector)?);
                }
            }
            Ok(info)
        })
    }

    /// Read one bank of a banked register. Out-of-range banks are refused
    /// before anything is sent to the MAC.
    pub fn read_banked_register(&self, address: u16, bank: u32) -> Result<u32> {
        const OP: &str = "read_banked_register";
        self.with_link(OP, |link| setup::read_banked(link, OP, address, bank))
    }

    pub fn write_banked_register(&self, address: u16, bank: u32, value: u32) -> Result<()> {
        const OP: &str = "write_banked_register";
        self.with_link(OP, |link| {
            if let Some(d) = registers::descriptor(address) {
                if !d.access.writable() {
                    return Err(Error::invalid(OP, format!("{} is read-only", d.name)));
                }
            }
            setup::write_banked(link, OP, address, bank, value)
        })
    }

    /// Contents of the MAC error latch.
    pub fn mac_error(&self) -> Result<u32> {
        self.with_link("mac_error", |link| link.read_register(registers::MAC_ERROR))
    }

    /// Clear the MAC error latch.
    pub fn clear_error(&self) -> Result<()> {
        self.command("clear_error", CMD_CLRERR).map(|_| ())
    }

    fn command(&self, op: &'static str, command: u32) -> Result<Response> {
        self.with_link(op, |link| {
            exchange::execute(link, op, command, Expected::Nothing, None, None)
        })
    }

    // OEM configuration, bypass registers and GPIO

    /// Read a word of OEM configuration.
    pub fn read_oem_config(&self, address: u32) -> Result<u32> {
        const OP: &str = "read_oem_config";
        self.with_link(OP, |link| {
            link.write_register(registers::HST_OEM_ADDR, address)?;
            match exchange::execute(link, OP, CMD_RDOEM, Expected::OemConfig { address }, None, None)? {
                Response::OemConfig(record) => Ok(record.data),
                other => Err(missing_payload(OP, other)),
            }
        })
    }

    pub fn write_oem_config(&self, address: u32, value: u32) -> Result<()> {
        const OP: &str = "write_oem_config";
        self.with_link(OP, |link| {
            link.write_register(registers::HST_OEM_ADDR, address)?;
            link.write_register(registers::HST_OEM_DATA, value)?;
            exchange::execute(link, OP, CMD_WROEM, Expected::Nothing, None, None).map(|_| ())
        })
    }

    /// Read a radio module register, bypassing the MAC.
    pub fn read_bypass_register(&self, address: u16) -> Result<u16> {
        const OP: &str = "read_bypass_register";
        self.with_link(OP, |link| {
            link.write_register(
                registers::HST_MBP_ADDR,
                fields::mbp::ADDRESS.set(0, address.into()),
            )?;
            match exchange::execute(
                link,
                OP,
                CMD_MBPRDREG,
                Expected::BypassRegister { address },
                None,
                None,
            )? {
                Response::BypassRegister(record) => Ok(record.data),
                other => Err(missing_payload(OP, other)),
            }
        })
    }

    pub fn write_bypass_register(&self, address: u16, value: u16) -> Result<()> {
        const OP: &str = "write_bypass_register";
        self.with_link(OP, |link| {
            link.write_register(
                registers::HST_MBP_ADDR,
                fields::mbp::ADDRESS.set(0, address.into()),
            )?;
            link.write_register(
                registers::HST_MBP_DATA,
                fields::mbp::DATA.set(0, value.into()),
            )?;
            exchange::execute(link, OP, CMD_MBPWRREG, Expected::Nothing, None, None).map(|_| ())
        })
    }

    fn gpio_command(&self, op: &'static str, command: u32, mask: u32, value: u32) -> Result<Response> {
        if mask & !GPIO_PIN_MASK != 0 {
            return Err(Error::invalid(
                op,
                format!("GPIO mask 0x{:X} names pins beyond {}", mask, GPIO_PINS),
            ));
        }
        self.with_link(op, |link| {
            link.write_register(registers::HST_GPIO_MSK, mask)?;
            link.write_register(registers::HST_GPIO_VAL, value & mask)?;
            let expected = if command == CMD_RDGPIO {
                Expected::Gpio
            } else {
                Expected::Nothing
            };
            exchange::execute(link, op, command, expected, None, None)
        })
    }

    /// Configure the pins in `mask` as outputs (bit set) or inputs.
    pub fn configure_gpio(&self, mask: u32, outputs: u32) -> Result<()> {
        self.gpio_command("configure_gpio", CMD_CFGGPIO, mask, outputs)
            .map(|_| ())
    }

    /// Read the pins in `mask`.
    pub fn read_gpio(&self, mask: u32) -> Result<u32> {
        const OP: &str = "read_gpio";
        match self.gpio_command(OP, CMD_RDGPIO, mask, 0)? {
            Response::Gpio(value) => Ok(value & mask),
            other => Err(missing_payload(OP, other)),
        }
    }

    pub fn write_gpio(&self, mask: u32, value: u32) -> Result<()> {
        self.gpio_command("write_gpio", CMD_WRGPIO, mask, value)
            .map(|_| ())
    }

    // Link profiles and power

    pub fn current_link_profile(&self) -> Result<u32> {
        self.with_link("current_link_profile", |link| {
            link.read_register(registers::HST_RFTC_CURRENT_PROFILE)
        })
    }

    /// Switch to another link profile.
    pub fn set_current_link_profile(&self, profile: u32) -> Result<()> {
        const OP: &str = "set_current_link_profile";
        setup::check_profile(OP, profile)?;
        self.with_link(OP, |link| {
            link.write_register(registers::HST_RFTC_CURRENT_PROFILE, profile)?;
            exchange::execute(link, OP, CMD_UPDATELINKPROFILE, Expected::Nothing, None, None)
                .map(|_| ())
        })
    }

    pub fn link_profile_info(&self, profile: u32) -> Result<LinkProfileInfo> {
        self.with_link("link_profile_info", |link| setup::link_profile_info(link, profile))
    }

    /// Read a transceiver register of a link profile.
    pub fn read_link_profile_register(&self, profile: u16, address: u16) -> Result<u16> {
        const OP: &str = "read_link_profile_register";
        setup::check_profile(OP, profile.into())?;
        self.with_link(OP, |link| {
            write_link_profile_target(link, profile, address)?;
            match exchange::execute(
                link,
                OP,
                CMD_LPROF_RDXCVRREG,
                Expected::LinkProfileRegister { profile, address },
                None,
                None,
            )? {
                Response::LinkProfileRegister(record) => Ok(record.data),
                other => Err(missing_payload(OP, other)),
            }
        })
    }

    pub fn write_link_profile_register(&self, profile: u16, address: u16, value: u16) -> Result<()> {
        const OP: &str = "write_link_profile_register";
        setup::check_profile(OP, profile.into())?;
        self.with_link(OP, |link| {
            write_link_profile_target(link, profile, address)?;
            link.write_register(
                registers::HST_LPROF_DATA,
                fields::lprof::DATA.set(0, value.into()),
            )?;
            exchange::execute(link, OP, CMD_LPROF_WRXCVRREG, Expected::Nothing, None, None)
                .map(|_| ())
        })
    }

    pub fn power_state(&self) -> Result<PowerState> {
        self.with_link("power_state", |link| {
            let mode = fields::pwrmgmt::MODE.get(link.read_register(registers::HST_PWRMGMT)?);
            Ok(if mode == PowerState::Standby as u32 {
                PowerState::Standby
            } else {
                PowerState::Full
            })
        })
    }

    pub fn set_power_state(&self, state: PowerState) -> Result<()> {
        const OP: &str = "set_power_state";
        self.with_link(OP, |link| {
            link.write_register(
                registers::HST_PWRMGMT,
                fields::pwrmgmt::MODE.set(0, state as u32),
            )?;
            exchange::execute(link, OP, CMD_SETPWRMGMTCFG, Expected::Nothing, None, None)
                .map(|_| ())
        })
    }

    // Antenna ports and operation mode

    pub fn antenna_port_state(&self, port: u32) -> Result<bool> {
        self.with_link("antenna_port_state", |link| setup::antenna_port_enabled(link, port))
    }

    pub fn set_antenna_port_state(&self, port: u32, enabled: bool) -> Result<()> {
        self.with_link("set_antenna_port_state", |link| {
            setup::set_antenna_port_enabled(link, port, enabled)
        })
    }

    pub fn antenna_port_status(&self, port: u32) -> Result<AntennaPortStatus> {
        self.with_link("antenna_port_status", |link| setup::antenna_port_status(link, port))
    }

    pub fn antenna_port_config(&self, port: u32) -> Result<AntennaPortConfig> {
        self.with_link("antenna_port_config", |link| setup::antenna_port_config(link, port))
    }

    pub fn set_antenna_port_config(&self, port: u32, config: &AntennaPortConfig) -> Result<()> {
        self.with_link("set_antenna_port_config", |link| {
            setup::set_antenna_port_config(link, port, config)
        })
    }

    pub fn operation_mode(&self) -> Result<OperationMode> {
        self.with_link("operation_mode", setup::operation_mode)
    }

    pub fn set_operation_mode(&self, mode: OperationMode) -> Result<()> {
        self.with_link("set_operation_mode", |link| setup::set_operation_mode(link, mode))
    }

    // Tag selection and singulation

    pub fn select_criteria(&self) -> Result<Vec<SelectCriterion>> {
        self.with_link("select_criteria", setup::select_criteria)
    }

    /// Program up to eight Select commands; descriptors beyond `criteria` are disabled.
    pub fn set_select_criteria(&self, criteria: &[SelectCriterion]) -> Result<()> {
        self.with_link("set_select_criteria", |link| {
            setup::set_select_criteria(link, criteria)
        })
    }

    pub fn post_match_criteria(&self) -> Result<PostMatchCriteria> {
        self.with_link("post_match_criteria", setup::post_match_criteria)
    }

    pub fn set_post_match_criteria(&self, criteria: &PostMatchCriteria) -> Result<()> {
        self.with_link("set_post_match_criteria", |link| {
            setup::set_post_match_criteria(link, criteria)
        })
    }

    pub fn query_params(&self) -> Result<QueryParams> {
        self.with_link("query_params", setup::query_params)
    }

    pub fn set_query_params(&self, params: &QueryParams) -> Result<()> {
        self.with_link("set_query_params", |link| setup::set_query_params(link, params))
    }

    pub fn singulation_algorithm(&self) -> Result<SingulationAlgorithm> {
        self.with_link("singulation_algorithm", setup::singulation_algorithm)
    }

    /// Make `algorithm` the active singulation algorithm and program its parameters.
    pub fn set_singulation_algorithm(&self, algorithm: &SingulationAlgorithm) -> Result<()> {
        self.with_link("set_singulation_algorithm", |link| {
            setup::set_singulation_algorithm(link, algorithm)
        })
    }

    // Tag operations

    fn run_tag_operation(
        &self,
        operation: TagOperation<'_>,
        callback: &mut PacketCallback<'_>,
    ) -> Result<OperationOutcome> {
        let op = operation.name();
        // The session starts with the claim so a cancel issued while the
        // operation is being programmed still lands.
        let (session, busy) = self.coordinator.begin(|| self.claim(op))?;
        let result = {
            let mut guard = self.lock_link();
            let link = &mut *guard;
            operation.program(link).and_then(|()| {
                exchange::execute(
                    link,
                    op,
                    operation.command(),
                    Expected::Stream,
                    Some(&self.coordinator),
                    Some(callback),
                )
            })
        };
        let cancelled = self.coordinator.was_cancelled();
        drop(busy);
        drop(session);

        match result {
            Ok(_) if cancelled => {
                info!("{} cancelled", op);
                Ok(OperationOutcome::Cancelled)
            }
            Ok(_) => Ok(OperationOutcome::Completed),
            Err(err) if err.is_cancelled() => {
                info!("{} aborted", op);
                Ok(OperationOutcome::Aborted)
            }
            Err(err) => Err(err),
        }
    }

    /// Run an inventory, handing every packet of the exchange to `callback`.
    ///
    /// # Arguments
    /// * `params` - Stop count, select and post-match flags
    /// * `callback` - Called for each packet; return [`PacketAction::Cancel`]
    ///   to stop gracefully
    ///
    /// # Returns
    /// How the operation ended. Cancel and abort are not errors.
    pub fn inventory<F>(&self, params: &InventoryParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Inventory(params), &mut callback)
    }

    /// Read tag memory. Data arrives in tag-access packets.
    pub fn tag_read<F>(&self, params: &ReadParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Read(params), &mut callback)
    }

    pub fn tag_write<F>(&self, params: &WriteParams<'_>, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Write(params), &mut callback)
    }

    pub fn tag_block_write<F>(&self, params: &BlockWriteParams<'_>, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::BlockWrite(params), &mut callback)
    }

    pub fn tag_block_erase<F>(&self, params: &BlockEraseParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::BlockErase(params), &mut callback)
    }

    pub fn tag_kill<F>(&self, params: &KillParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Kill(params), &mut callback)
    }

    pub fn tag_lock<F>(&self, params: &LockParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Lock(params), &mut callback)
    }

    /// Impinj Monza QT read or write.
    pub fn tag_qt<F>(&self, params: &QtParams, mut callback: F) -> Result<OperationOutcome>
    where
        F: FnMut(&Packet<'_>) -> PacketAction,
    {
        self.run_tag_operation(TagOperation::Qt(params), &mut callback)
    }

    /// Stop the running tag operation after the MAC finishes its command.
    ///
    /// Blocks until the operation has delivered its last packet. Fails with
    /// [`ErrorKind::CurrentlyNotAllowed`] when called from the packet callback;
    /// return [`PacketAction::Cancel`] there instead.
    pub fn cancel_operation(&self) -> Result<()> {
        self.coordinator.request(Request::Cancel, "cancel_operation")
    }

    /// Stop the running tag operation immediately, discarding pending packets.
    pub fn abort_operation(&self) -> Result<()> {
        self.coordinator.request(Request::Abort, "abort_operation")
    }

    // Firmware and reset

    /// Program MAC nonvolatile memory.
    ///
    /// With `test_mode` the MAC checks every packet but programs nothing.
    pub fn update_nonvolatile_memory(&self, blocks: &[NvMemBlock<'_>], test_mode: bool) -> Result<()> {
        const OP: &str = "update_nonvolatile_memory";
        if blocks.iter().all(|b| b.data.is_empty()) {
            return Err(Error::invalid(OP, "nothing to write"));
        }
        self.with_link(OP, |link| nvupdate::update(link, blocks, test_mode))
    }

    /// Reset the MAC. The session stays open; pending data is dropped.
    pub fn reset(&self, kind: ResetKind) -> Result<()> {
        self.with_link("reset", |link| link.reset(kind))
    }
}

fn write_link_profile_target<T: MacTransport>(link: &mut MacLink<T>, profile: u16, address: u16) -> Result<()> {
    link.write_register(
        registers::HST_LPROF_SEL,
        fields::lprof::SELECTOR.set(0, profile.into()),
    )?;
    link.write_register(
        registers::HST_LPROF_ADDR,
        fields::lprof::ADDRESS.set(0, address.into()),
    )
}

fn missing_payload(op: &'static str, response: Response) -> Error {
    Error::new(
        ErrorKind::UnexpectedPacket,
        op,
        format!("exchange produced {:?}", response),
    )
}
