//! Command/response state machine.
//!
//! A command exchange starts when the host writes a command code to
//! `HST_CMD`. The MAC answers with exactly one `COMMAND_BEGIN`, an optional
//! command-specific payload (or, for tag operations, a stream of packets)
//! and exactly one `COMMAND_END` carrying the status. Packets that do not fit
//! the current state abort the exchange.

use log::{debug, error, info, warn};

use crate::coordinator::CancelCoordinator;
use crate::error::{Error, ErrorKind, Result};
use crate::link::MacLink;
use crate::packet::{
    BypassRegisterRecord, LinkProfileRegisterRecord, NvUpdateConfigRecord, OemConfigRecord, Packet,
    PacketType,
};
use crate::registers::{HST_CMD, commands::CMD_CLRERR, mac_errors};
use crate::transport::MacTransport;
use crate::types::{PacketAction, bytes_to_hex};

/// Callback receiving the packets of a streaming exchange.
pub(crate) type PacketCallback<'a> = dyn FnMut(&Packet<'_>) -> PacketAction + 'a;

/// What an exchange produces between `COMMAND_BEGIN` and `COMMAND_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expected {
    Nothing,
    OemConfig { address: u32 },
    BypassRegister { address: u16 },
    Gpio,
    NvUpdateConfig,
    LinkProfileRegister { profile: u16, address: u16 },
    /// Any number of packets, each handed to the callback.
    Stream,
}

impl Expected {
    fn packet_type(self) -> Option<PacketType> {
        match self {
            Expected::OemConfig { .. } => Some(PacketType::OemConfigRead),
            Expected::BypassRegister { .. } => Some(PacketType::BypassRegisterRead),
            Expected::Gpio => Some(PacketType::GpioRead),
            Expected::NvUpdateConfig => Some(PacketType::NvUpdateConfig),
            Expected::LinkProfileRegister { .. } => Some(PacketType::LinkProfileRegisterRead),
            Expected::Nothing | Expected::Stream => None,
        }
    }
}

/// Typed payload extracted from an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Response {
    None,
    OemConfig(OemConfigRecord),
    BypassRegister(BypassRegisterRecord),
    Gpio(u32),
    NvUpdateConfig(NvUpdateConfigRecord),
    LinkProfileRegister(LinkProfileRegisterRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectCommandBegin,
    ExpectPayload(PacketType),
    ExpectCommandEnd,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    /// The callback asked for a graceful cancel.
    Cancel,
    Finished,
}

pub(crate) struct CommandExchange {
    command: u32,
    expected: Expected,
    state: State,
    response: Response,
    status: Option<u32>,
}

impl CommandExchange {
    const OP: &'static str = "command_exchange";

    pub(crate) fn new(command: u32, expected: Expected) -> Self {
        Self {
            command,
            expected,
            state: State::ExpectCommandBegin,
            response: Response::None,
            status: None,
        }
    }

    pub(crate) fn status(&self) -> Option<u32> {
        self.status
    }

    pub(crate) fn response(&self) -> Response {
        self.response
    }

    fn unexpected(&self, packet: &Packet<'_>) -> Error {
        error!(
            "Unexpected {:?} packet in state {:?} (command 0x{:02X})",
            packet.packet_type(),
            self.state,
            self.command
        );
        Error::new(
            ErrorKind::UnexpectedPacket,
            Self::OP,
            format!(
                "{:?} packet while in {:?} for command 0x{:02X}",
                packet.packet_type(),
                self.state,
                self.command
            ),
        )
    }

    fn malformed(&self, packet: &Packet<'_>) -> Error {
        Error::new(
            ErrorKind::UnexpectedPacket,
            Self::OP,
            format!("truncated {:?} packet", packet.packet_type()),
        )
    }

    /// Advance the state machine by one packet.
    pub(crate) fn on_packet(
        &mut self,
        packet: &Packet<'_>,
        callback: Option<&mut PacketCallback<'_>>,
    ) -> Result<Progress> {
        let packet_type = packet.packet_type();
        if packet_type == PacketType::Debug {
            debug!("MAC debug packet: {}", bytes_to_hex(packet.body()));
            return Ok(Progress::Continue);
        }

        let finished = match (self.state, packet_type) {
            (State::ExpectCommandBegin, PacketType::CommandBegin) => {
                let begin = packet.command_begin().ok_or_else(|| self.malformed(packet))?;
                if begin.command != self.command {
                    return Err(Error::new(
                        ErrorKind::UnexpectedPacket,
                        Self::OP,
                        format!(
                            "began command 0x{:02X}, expected 0x{:02X}",
                            begin.command, self.command
                        ),
                    ));
                }
                self.state = match self.expected {
                    Expected::Stream => State::Streaming,
                    other => match other.packet_type() {
                        Some(payload) => State::ExpectPayload(payload),
                        None => State::ExpectCommandEnd,
                    },
                };
                false
            }
            (State::ExpectPayload(wanted), found) if wanted == found => {
                self.response = self.extract(packet)?;
                self.state = State::ExpectCommandEnd;
                false
            }
            (State::ExpectPayload(_), PacketType::CommandEnd)
            | (State::ExpectCommandEnd, PacketType::CommandEnd)
            | (State::Streaming, PacketType::CommandEnd) => {
                let end = packet.command_end().ok_or_else(|| self.malformed(packet))?;
                // Only a failing command may end without its payload.
                if matches!(self.state, State::ExpectPayload(_)) && end.status == 0 {
                    return Err(self.unexpected(packet));
                }
                self.status = Some(end.status);
                self.state = State::ExpectCommandBegin;
                true
            }
            (State::Streaming, PacketType::CommandBegin) => return Err(self.unexpected(packet)),
            (State::Streaming, _) => false,
            _ => return Err(self.unexpected(packet)),
        };

        let mut progress = if finished {
            Progress::Finished
        } else {
            Progress::Continue
        };
        if self.expected == Expected::Stream {
            if let Some(callback) = callback {
                if callback(packet) == PacketAction::Cancel && !finished {
                    progress = Progress::Cancel;
                }
            }
        }
        Ok(progress)
    }

    fn extract(&self, packet: &Packet<'_>) -> Result<Response> {
        let mismatch = |what: &str, got: u32, want: u32| {
            Error::invalid(
                Self::OP,
                format!("{} echo 0x{:X} does not match 0x{:X}", what, got, want),
            )
        };
        let response = match self.expected {
            Expected::OemConfig { address } => {
                let record = packet.oem_config().ok_or_else(|| self.malformed(packet))?;
                if record.address != address {
                    return Err(mismatch("OEM address", record.address, address));
                }
                Response::OemConfig(record)
            }
            Expected::BypassRegister { address } => {
                let record = packet.bypass_register().ok_or_else(|| self.malformed(packet))?;
                if record.address != address {
                    return Err(mismatch(
                        "bypass address",
                        record.address.into(),
                        address.into(),
                    ));
                }
                Response::BypassRegister(record)
            }
            Expected::Gpio => Response::Gpio(packet.gpio().ok_or_else(|| self.malformed(packet))?),
            Expected::NvUpdateConfig => Response::NvUpdateConfig(
                packet
                    .nv_update_config()
                    .ok_or_else(|| self.malformed(packet))?,
            ),
            Expected::LinkProfileRegister { profile, address } => {
                let record = packet
                    .link_profile_register()
                    .ok_or_else(|| self.malformed(packet))?;
                if record.profile != profile {
                    return Err(mismatch("profile", record.profile.into(), profile.into()));
                }
                if record.address != address {
                    return Err(mismatch(
                        "transceiver address",
                        record.address.into(),
                        address.into(),
                    ));
                }
                Response::LinkProfileRegister(record)
            }
            Expected::Nothing | Expected::Stream => Response::None,
        };
        Ok(response)
    }
}

/// Pull packets until the exchange finishes.
fn drive<T: MacTransport>(
    link: &mut MacLink<T>,
    exchange: &mut CommandExchange,
    cancel: Option<&CancelCoordinator>,
    mut callback: Option<&mut PacketCallback<'_>>,
) -> Result<()> {
    loop {
        let bytes = link.retrieve_next_packet(cancel)?;
        let packet = Packet::parse(bytes).ok_or_else(|| {
            Error::new(
                ErrorKind::UnexpectedPacket,
                CommandExchange::OP,
                "packet shorter than its header",
            )
        })?;
        debug!(
            "Packet {:?} ({} bytes)",
            packet.packet_type(),
            bytes.len()
        );
        match exchange.on_packet(&packet, callback.as_deref_mut())? {
            Progress::Continue => {}
            Progress::Finished => return Ok(()),
            Progress::Cancel => match cancel {
                Some(coordinator) => coordinator.request_cancel_from_owner(),
                None => warn!(
                    "Command 0x{:02X} cannot be cancelled; ignoring request",
                    exchange.command
                ),
            },
        }
    }
}

/// Write the command register and run the exchange to completion, without
/// interpreting the final status.
fn issue<T: MacTransport>(
    link: &mut MacLink<T>,
    exchange: &mut CommandExchange,
    cancel: Option<&CancelCoordinator>,
    callback: Option<&mut PacketCallback<'_>>,
) -> Result<()> {
    link.write_register(HST_CMD, exchange.command)?;
    let result = drive(link, exchange, cancel, callback);
    if let Err(err) = &result {
        if err.kind().needs_resync() {
            error!("Command 0x{:02X} failed: {}", exchange.command, err);
            if let Err(abort_err) = link.abort() {
                warn!("Abort after failure also failed: {}", abort_err);
            }
        } else if err.is_cancelled() {
            info!("Command 0x{:02X} aborted", exchange.command);
        }
    }
    result
}

/// Run a complete command exchange and return its payload.
///
/// A nonzero `COMMAND_END` status clears the MAC error latch, aborts the MAC
/// command and is reported
/// as [`ErrorKind::InvalidParameter`] for bounds errors, otherwise as
/// [`ErrorKind::RadioFailure`].
pub(crate) fn execute<T: MacTransport>(
    link: &mut MacLink<T>,
    operation: &'static str,
    command: u32,
    expected: Expected,
    cancel: Option<&CancelCoordinator>,
    callback: Option<&mut PacketCallback<'_>>,
) -> Result<Response> {
    let mut exchange = CommandExchange::new(command, expected);
    issue(link, &mut exchange, cancel, callback)?;

    match exchange.status() {
        Some(0) | None => Ok(exchange.response()),
        Some(status) => {
            error!(
                "{}: command 0x{:02X} ended with MAC error 0x{:04X}",
                operation, command, status
            );
            clear_error_latch(link);
            if let Err(abort_err) = link.abort() {
                warn!("Abort after MAC error also failed: {}", abort_err);
            }
            let kind = if mac_errors::is_parameter_error(status) {
                ErrorKind::InvalidParameter
            } else {
                ErrorKind::RadioFailure
            };
            Err(Error::new(
                kind,
                operation,
                format!("MAC error 0x{:04X}", status),
            ))
        }
    }
}

/// Issue `CMD_CLRERR`, logging rather than reporting any failure.
pub(crate) fn clear_error_latch<T: MacTransport>(link: &mut MacLink<T>) {
    let mut exchange = CommandExchange::new(CMD_CLRERR, Expected::Nothing);
    match issue(link, &mut exchange, None, None) {
        Ok(()) if exchange.status() == Some(0) => {}
        Ok(()) => warn!("Clearing MAC error ended with status {:?}", exchange.status()),
        Err(err) => warn!("Clearing MAC error failed: {}", err),
    }
}
