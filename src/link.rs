//! Byte-level link to the MAC: register access and packet framing.

use std::thread;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, warn};

use crate::config::RadioConfig;
use crate::coordinator::{CancelCoordinator, Request};
use crate::error::{Error, ErrorKind, Result};
use crate::packet::{COMMON_HEADER_LEN, PacketHeader};
use crate::transport::{MacTransport, ResetKind, TransportCharacteristics};

/// Size of a register access request and of its response.
pub(crate) const REGISTER_ACCESS_LEN: usize = 8;
const ACCESS_READ: u16 = 0x0000;
const ACCESS_WRITE: u16 = 0x0001;

pub(crate) fn encode_register_request(access: u16, address: u16, value: u32) -> [u8; REGISTER_ACCESS_LEN] {
    let mut request = [0u8; REGISTER_ACCESS_LEN];
    LittleEndian::write_u16(&mut request[0..2], access);
    LittleEndian::write_u16(&mut request[2..4], address);
    LittleEndian::write_u32(&mut request[4..8], value);
    request
}

/// Owns the transport and the receive-side bookkeeping.
pub(crate) struct MacLink<T: MacTransport> {
    transport: T,
    /// Bytes known to be ready in the transport without blocking.
    bytes_available: usize,
    poll_interval: Duration,
    responsiveness_timeout: Option<Duration>,
    legacy_firmware: bool,
    rx: Vec<u8>,
}

impl<T: MacTransport> MacLink<T> {
    pub(crate) fn new(transport: T, config: &RadioConfig) -> Self {
        Self {
            transport,
            bytes_available: 0,
            poll_interval: config.get_poll_interval(),
            responsiveness_timeout: config.get_responsiveness_timeout(),
            legacy_firmware: config.legacy_override().unwrap_or(false),
            rx: Vec::new(),
        }
    }

    /// Firmware older than 2.4 is exempt from the responsiveness timeout.
    pub(crate) fn set_legacy_firmware(&mut self, legacy: bool) {
        self.legacy_firmware = legacy;
    }

    pub(crate) fn characteristics(&self) -> TransportCharacteristics {
        self.transport.characteristics()
    }

    #[cfg(test)]
    pub(crate) fn bytes_available(&self) -> usize {
        self.bytes_available
    }

    pub(crate) fn write_all(&mut self, data: &[u8], operation: &'static str) -> Result<()> {
        let written = self
            .transport
            .write(data)
            .map_err(|e| Error::transport(operation, e))?;
        if written != data.len() {
            return Err(Error::new(
                ErrorKind::Transport,
                operation,
                format!("short write: {} of {} bytes", written, data.len()),
            ));
        }
        Ok(())
    }

    pub(crate) fn read_register(&mut self, address: u16) -> Result<u32> {
        const OP: &str = "read_register";
        self.write_all(&encode_register_request(ACCESS_READ, address, 0), OP)?;

        let mut response = [0u8; REGISTER_ACCESS_LEN];
        self.retrieve_buffer(&mut response, None)?;

        let echoed = LittleEndian::read_u16(&response[2..4]);
        if echoed != address {
            error!(
                "Register read desync: asked for 0x{:04X}, MAC answered 0x{:04X}",
                address, echoed
            );
            return Err(Error::invalid(
                OP,
                format!("echoed address 0x{:04X} does not match 0x{:04X}", echoed, address),
            ));
        }
        let value = LittleEndian::read_u32(&response[4..8]);
        debug!("Read register 0x{:04X} = 0x{:08X}", address, value);
        Ok(value)
    }

    pub(crate) fn write_register(&mut self, address: u16, value: u32) -> Result<()> {
        debug!("Write register 0x{:04X} = 0x{:08X}", address, value);
        self.write_all(
            &encode_register_request(ACCESS_WRITE, address, value),
            "write_register",
        )
    }

    /// Read one complete packet (header plus body) into the internal buffer.
    pub(crate) fn retrieve_next_packet(&mut self, cancel: Option<&CancelCoordinator>) -> Result<&[u8]> {
        let mut buf = std::mem::take(&mut self.rx);
        let result = self.fill_packet(&mut buf, cancel);
        self.rx = buf;
        result?;
        Ok(&self.rx)
    }

    fn fill_packet(&mut self, buf: &mut Vec<u8>, cancel: Option<&CancelCoordinator>) -> Result<()> {
        let mut header = [0u8; COMMON_HEADER_LEN];
        self.retrieve_buffer(&mut header, cancel)?;
        let remaining = PacketHeader::parse(&header).map_or(0, |h| h.body_len());

        buf.clear();
        buf.extend_from_slice(&header);
        buf.resize(COMMON_HEADER_LEN + remaining, 0);
        if remaining > 0 {
            self.retrieve_buffer(&mut buf[COMMON_HEADER_LEN..], cancel)?;
        }
        Ok(())
    }

    /// Fill `out` completely, polling the transport until enough bytes are ready.
    pub(crate) fn retrieve_buffer(&mut self, out: &mut [u8], cancel: Option<&CancelCoordinator>) -> Result<()> {
        self.wait_for(out.len(), cancel)?;
        self.retrieve_raw_bytes(out, cancel)
    }

    fn wait_for(&mut self, size: usize, cancel: Option<&CancelCoordinator>) -> Result<()> {
        const OP: &str = "retrieve_buffer";
        let timeout = if self.legacy_firmware {
            None
        } else {
            self.responsiveness_timeout
        };
        let mut last_seen = self.bytes_available;
        let mut unchanged_since = Instant::now();

        loop {
            if let Some(coordinator) = cancel {
                self.service_request(coordinator)?;
            }
            if self.bytes_available >= size {
                return Ok(());
            }

            let available = self
                .transport
                .bytes_available()
                .map_err(|e| Error::transport(OP, e))?;
            self.bytes_available = available;
            if available >= size {
                return Ok(());
            }

            if available != last_seen {
                last_seen = available;
                unchanged_since = Instant::now();
            } else if let Some(limit) = timeout {
                if unchanged_since.elapsed() > limit {
                    error!(
                        "MAC produced no data for {:?} ({} of {} bytes ready)",
                        limit, available, size
                    );
                    return Err(Error::new(
                        ErrorKind::RadioNotResponding,
                        OP,
                        format!("no new data for {:?}", limit),
                    ));
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    fn retrieve_raw_bytes(&mut self, out: &mut [u8], cancel: Option<&CancelCoordinator>) -> Result<()> {
        const OP: &str = "retrieve_raw_bytes";
        if let Some(coordinator) = cancel {
            self.service_request(coordinator)?;
        }
        let read = self
            .transport
            .read(out)
            .map_err(|e| Error::transport(OP, e))?;
        if read != out.len() {
            return Err(Error::new(
                ErrorKind::Transport,
                OP,
                format!("short read: {} of {} bytes", read, out.len()),
            ));
        }
        self.bytes_available = self.bytes_available.saturating_sub(read);
        Ok(())
    }

    /// Act on a pending cancel or abort request.
    fn service_request(&mut self, coordinator: &CancelCoordinator) -> Result<()> {
        match coordinator.take() {
            Some(Request::Abort) => {
                debug!("Aborting in-flight operation");
                self.abort()?;
                Err(Error::new(
                    ErrorKind::OperationCancelled,
                    "abort_operation",
                    "operation aborted",
                ))
            }
            Some(Request::Cancel) => {
                debug!("Cancelling in-flight operation");
                self.transport
                    .cancel()
                    .map_err(|e| Error::transport("cancel_operation", e))?;
                coordinator.mark_cancelled();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Abort the current MAC command and forget any buffered data.
    pub(crate) fn abort(&mut self) -> Result<()> {
        self.bytes_available = 0;
        self.transport
            .abort()
            .map_err(|e| Error::transport("abort", e))
    }

    pub(crate) fn reset(&mut self, kind: ResetKind) -> Result<()> {
        warn!("Resetting MAC ({:?})", kind);
        self.bytes_available = 0;
        self.transport
            .reset(kind)
            .map_err(|e| Error::transport("reset", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{SimulatedMac, packets};
    use crate::packet::{Packet, PacketType};
    use crate::registers::MAC_VER;

    fn link(mac: &SimulatedMac) -> MacLink<SimulatedMac> {
        let config = RadioConfig::default()
            .poll_interval(Duration::from_millis(1))
            .responsiveness_timeout(Some(Duration::from_millis(50)));
        MacLink::new(mac.clone(), &config)
    }

    #[test]
    fn register_request_layout() {
        assert_eq!(
            encode_register_request(ACCESS_WRITE, 0x0A03, 0x1234_5678),
            [0x01, 0x00, 0x03, 0x0A, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn register_round_trip() {
        let mac = SimulatedMac::new();
        let mut link = link(&mac);
        link.write_register(0x0B81, 0xCAFE_F00D).unwrap();
        assert_eq!(link.read_register(0x0B81).unwrap(), 0xCAFE_F00D);
        assert_eq!(
            mac.written().last().unwrap(),
            &vec![0x00, 0x00, 0x81, 0x0B, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn mismatched_echo_is_invalid_parameter() {
        let mac = SimulatedMac::new();
        mac.with(|s| s.corrupt_echo = true);
        let mut link = link(&mac);
        let err = link.read_register(MAC_VER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn packet_is_read_in_two_steps() {
        let mac = SimulatedMac::new();
        mac.push_rx(&packets::end(0));
        mac.push_rx(&packets::begin(0x0F));
        let mut link = link(&mac);

        let bytes = link.retrieve_next_packet(None).unwrap().to_vec();
        let packet = Packet::parse(&bytes).unwrap();
        assert_eq!(packet.packet_type(), PacketType::CommandEnd);
        assert_eq!(bytes.len(), COMMON_HEADER_LEN + 8);
        assert_eq!(mac.with(|s| s.reads), 2);

        let bytes = link.retrieve_next_packet(None).unwrap().to_vec();
        assert_eq!(Packet::parse(&bytes).unwrap().packet_type(), PacketType::CommandBegin);
        assert_eq!(link.bytes_available(), 0);
    }

    #[test]
    fn stall_on_current_firmware_is_not_responding() {
        let mac = SimulatedMac::new();
        mac.push_rx(&packets::begin(0x0F)[..4]);
        let mut link = link(&mac);
        let err = link.retrieve_next_packet(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RadioNotResponding);
    }

    #[test]
    fn stall_on_legacy_firmware_keeps_waiting() {
        let mac = SimulatedMac::new();
        mac.push_rx(&packets::begin(0x0F));
        mac.delay_responses(Duration::from_millis(150));
        let mut link = link(&mac);
        link.set_legacy_firmware(true);
        let bytes = link.retrieve_next_packet(None).unwrap();
        assert_eq!(Packet::parse(bytes).unwrap().packet_type(), PacketType::CommandBegin);
    }

    #[test]
    fn abort_skips_the_read_and_clears_the_cache() {
        let mac = SimulatedMac::new();
        mac.push_rx(&packets::begin(0x0F));
        let mut link = link(&mac);
        let mut header = [0u8; 4];
        link.retrieve_buffer(&mut header, None).unwrap();
        assert_eq!(link.bytes_available(), 12);

        let coordinator = CancelCoordinator::default();
        let (_session, ()) = coordinator.begin(|| Ok(())).unwrap();
        coordinator.request_cancel_from_owner();
        coordinator.raise(Request::Abort);

        let reads_before = mac.with(|s| s.reads);
        let mut rest = [0u8; 12];
        let err = link.retrieve_buffer(&mut rest, Some(&coordinator)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);
        assert_eq!(link.bytes_available(), 0);
        assert_eq!(mac.with(|s| s.reads), reads_before);
        assert_eq!(mac.with(|s| (s.aborts, s.cancels)), (1, 0));
    }

    #[test]
    fn cancel_lets_remaining_bytes_through() {
        let mac = SimulatedMac::new();
        mac.push_rx(&packets::end(0));
        let mut link = link(&mac);
        let coordinator = CancelCoordinator::default();
        let (_session, ()) = coordinator.begin(|| Ok(())).unwrap();
        coordinator.request_cancel_from_owner();

        let bytes = link.retrieve_next_packet(Some(&coordinator)).unwrap();
        assert_eq!(Packet::parse(bytes).unwrap().packet_type(), PacketType::CommandEnd);
        assert!(coordinator.was_cancelled());
        assert_eq!(mac.with(|s| s.cancels), 1);
    }
}
