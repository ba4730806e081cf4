//! Serial port transport for desktop using serialport crate

use crate::transport::{MacTransport, ResetKind, TransportCharacteristics};
use std::io::{Read, Write};
use std::time::Duration;

const CONTROL_PREFIX: u8 = 0x40;
const CONTROL_CANCEL: u8 = 0x01;
const CONTROL_SOFT_RESET: u8 = 0x02;
const CONTROL_ABORT: u8 = 0x03;
const CONTROL_BOOTLOADER_RESET: u8 = 0x07;

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_secs(1))
            .open()?;
        std::thread::sleep(Duration::from_millis(500));
        port.clear(serialport::ClearBuffer::Input)?;

        Ok(Self { port })
    }

    fn control(&mut self, op: u8) -> std::io::Result<()> {
        let frame = [CONTROL_PREFIX, op, 0, 0, 0, 0, 0, 0];
        self.port.write_all(&frame)?;
        self.port.flush()
    }
}

impl MacTransport for SerialTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        self.port.write_all(data)?;
        Ok(data.len())
    }

    fn bytes_available(&mut self) -> Result<usize, Self::Error> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(std::io::Error::other)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.port.read_exact(buf)?;
        Ok(buf.len())
    }

    fn cancel(&mut self) -> Result<(), Self::Error> {
        self.control(CONTROL_CANCEL)
    }

    fn abort(&mut self) -> Result<(), Self::Error> {
        self.control(CONTROL_ABORT)?;
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::other)
    }

    fn reset(&mut self, kind: ResetKind) -> Result<(), Self::Error> {
        match kind {
            ResetKind::Soft => self.control(CONTROL_SOFT_RESET),
            ResetKind::ToBootloader => self.control(CONTROL_BOOTLOADER_RESET),
        }
    }

    fn characteristics(&self) -> TransportCharacteristics {
        TransportCharacteristics {
            driver_version: 1,
            max_buffer_size: 4096,
            max_packet_size: 1024,
        }
    }
}
