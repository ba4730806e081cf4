//! Simulated MAC for unit tests.
//!
//! Behaves like the firmware closely enough to drive the whole packet engine:
//! a banked register file, command exchanges generated from register state,
//! per-command scripted packet streams, packets held back until the host
//! cancels, the nonvolatile update mode and a response delay for stall tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use crate::link::REGISTER_ACCESS_LEN;
use crate::nvupdate::{self, command as nv_command, status as nv_status};
use crate::registers::{self, Layout, commands::*, mac_errors};
use crate::transport::{MacTransport, ResetKind, TransportCharacteristics};

/// Builders for MAC-originated packets.
pub(crate) mod packets {
    use crate::packet::{PacketType, encode};

    pub(crate) fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub(crate) fn begin(command: u32) -> Vec<u8> {
        encode(PacketType::CommandBegin, 0, &words(&[command, 0]))
    }

    pub(crate) fn end(status: u32) -> Vec<u8> {
        encode(PacketType::CommandEnd, 0, &words(&[0, status]))
    }

    pub(crate) fn debug(text: &[u8]) -> Vec<u8> {
        encode(PacketType::Debug, 0, text)
    }

    pub(crate) fn oem(address: u32, data: u32) -> Vec<u8> {
        encode(PacketType::OemConfigRead, 0, &words(&[address, data]))
    }

    pub(crate) fn bypass(address: u16, data: u16) -> Vec<u8> {
        let mut body = address.to_le_bytes().to_vec();
        body.extend_from_slice(&data.to_le_bytes());
        encode(PacketType::BypassRegisterRead, 0, &body)
    }

    pub(crate) fn gpio(value: u32) -> Vec<u8> {
        encode(PacketType::GpioRead, 0, &words(&[value]))
    }

    pub(crate) fn nv_config(max_packet_len: u32) -> Vec<u8> {
        encode(PacketType::NvUpdateConfig, 0, &words(&[max_packet_len, 0]))
    }

    pub(crate) fn link_profile(profile: u16, address: u16, data: u16) -> Vec<u8> {
        let mut body = Vec::new();
        for v in [profile, address, data, 0] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        encode(PacketType::LinkProfileRegisterRead, 0, &body)
    }

    /// Inventory packet for a tag backscattering `epc` (PC computed, CRC zeroed).
    pub(crate) fn inventory(epc: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 12];
        body[8..10].copy_from_slice(&0x00C8u16.to_le_bytes());
        let pc = ((epc.len() as u16 / 2) & 0x1F) << 11;
        body.extend_from_slice(&pc.to_be_bytes());
        body.extend_from_slice(epc);
        body.extend_from_slice(&[0, 0]);
        encode(PacketType::Inventory, 0, &body)
    }

    pub(crate) fn tag_access(command: u8, error: bool, data: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 12];
        body[4] = command;
        body.extend_from_slice(data);
        encode(PacketType::TagAccess, u8::from(error), &body)
    }
}

/// Packets a command produces instead of the default exchange.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub packets: Vec<Vec<u8>>,
    /// Delivered only after the host cancels.
    pub after_cancel: Vec<Vec<u8>>,
}

impl Script {
    pub(crate) fn new(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets,
            after_cancel: Vec::new(),
        }
    }

    pub(crate) fn after_cancel(mut self, packets: Vec<Vec<u8>>) -> Self {
        self.after_cancel = packets;
        self
    }
}

#[derive(Debug)]
pub(crate) struct MacState {
    /// Keyed by (address, bank); bank is zero for unbanked registers.
    pub registers: HashMap<(u16, u32), u32>,
    pub oem: HashMap<u32, u32>,
    pub bypass: HashMap<u16, u16>,
    pub link_profile_registers: HashMap<(u16, u16), u16>,
    pub gpio_config: u32,
    pub gpio_value: u32,
    pub rx: VecDeque<u8>,
    pub held: Vec<Vec<u8>>,
    pub scripts: HashMap<u32, VecDeque<Script>>,
    /// Every buffer the host wrote, in order.
    pub written: Vec<Vec<u8>>,
    /// Command codes written to `HST_CMD`.
    pub commands: Vec<u32>,
    pub corrupt_echo: bool,
    pub nv_mode: bool,
    pub nv_max_packet_len: u32,
    pub nv_entry_status: u32,
    /// Status answered to successive update-range packets; success once empty.
    pub nv_statuses: VecDeque<u32>,
    pub nv_packets: Vec<Vec<u8>>,
    pub max_packet_size: usize,
    pub silent_until: Option<Instant>,
    pub reads: usize,
    pub cancels: usize,
    pub aborts: usize,
    pub resets: Vec<ResetKind>,
}

impl Default for MacState {
    fn default() -> Self {
        let mut registers = HashMap::new();
        registers.insert((registers::MAC_VER, 0), 0x0205_0000);
        Self {
            registers,
            oem: HashMap::new(),
            bypass: HashMap::new(),
            link_profile_registers: HashMap::new(),
            gpio_config: 0,
            gpio_value: 0,
            rx: VecDeque::new(),
            held: Vec::new(),
            scripts: HashMap::new(),
            written: Vec::new(),
            commands: Vec::new(),
            corrupt_echo: false,
            nv_mode: false,
            nv_max_packet_len: 1024,
            nv_entry_status: nv_status::ENTRY_OK,
            nv_statuses: VecDeque::new(),
            nv_packets: Vec::new(),
            max_packet_size: 1024,
            silent_until: None,
            reads: 0,
            cancels: 0,
            aborts: 0,
            resets: Vec::new(),
        }
    }
}

impl MacState {
    fn push(&mut self, packet: &[u8]) {
        self.rx.extend(packet.iter().copied());
    }

    fn raw(&self, address: u16) -> u32 {
        self.registers.get(&(address, 0)).copied().unwrap_or(0)
    }

    /// Resolve the bank a register access lands in, latching a bounds error
    /// when the selector is out of range.
    fn bank(&mut self, address: u16) -> Option<u32> {
        let Some(Layout::Banked { selector }) = registers::descriptor(address).map(|d| d.layout) else {
            return Some(0);
        };
        let bank = self.raw(selector);
        let size = match registers::descriptor(selector).map(|d| d.layout) {
            Some(Layout::Selector { bank_size }) => u32::from(bank_size),
            _ => 0,
        };
        if bank >= size {
            self.registers
                .insert((registers::MAC_ERROR, 0), mac_errors::SELECTOR_BOUNDS);
            return None;
        }
        Some(bank)
    }

    pub(crate) fn register(&self, address: u16, bank: u32) -> u32 {
        self.registers.get(&(address, bank)).copied().unwrap_or(0)
    }

    fn register_access(&mut self, request: &[u8]) {
        let access = LittleEndian::read_u16(&request[0..2]);
        let address = LittleEndian::read_u16(&request[2..4]);
        let value = LittleEndian::read_u32(&request[4..8]);

        if access == 1 {
            if address == registers::HST_CMD {
                self.run_command(value);
            } else if let Some(bank) = self.bank(address) {
                self.registers.insert((address, bank), value);
            }
            return;
        }

        let data = match self.bank(address) {
            Some(bank) => self.register(address, bank),
            None => 0,
        };
        let echoed = if self.corrupt_echo { address ^ 0x0001 } else { address };
        let mut response = [0u8; REGISTER_ACCESS_LEN];
        LittleEndian::write_u16(&mut response[2..4], echoed);
        LittleEndian::write_u32(&mut response[4..8], data);
        self.rx.extend(response);
    }

    fn run_command(&mut self, command: u32) {
        self.commands.push(command);
        if let Some(script) = self.scripts.get_mut(&command).and_then(VecDeque::pop_front) {
            for packet in &script.packets {
                self.push(packet);
            }
            self.held.extend(script.after_cancel);
            return;
        }

        self.push(&packets::begin(command));
        let oem_addr = self.raw(registers::HST_OEM_ADDR);
        let mbp_addr = self.raw(registers::HST_MBP_ADDR) as u16;
        let lprof = (
            self.raw(registers::HST_LPROF_SEL) as u16,
            self.raw(registers::HST_LPROF_ADDR) as u16,
        );
        let gpio_mask = self.raw(registers::HST_GPIO_MSK);
        match command {
            CMD_RDOEM => {
                let data = self.oem.get(&oem_addr).copied().unwrap_or(0);
                self.push(&packets::oem(oem_addr, data));
            }
            CMD_WROEM => {
                let data = self.raw(registers::HST_OEM_DATA);
                self.oem.insert(oem_addr, data);
            }
            CMD_MBPRDREG => {
                let data = self.bypass.get(&mbp_addr).copied().unwrap_or(0);
                self.push(&packets::bypass(mbp_addr, data));
            }
            CMD_MBPWRREG => {
                let data = self.raw(registers::HST_MBP_DATA) as u16;
                self.bypass.insert(mbp_addr, data);
            }
            CMD_RDGPIO => {
                let value = self.gpio_value & gpio_mask;
                self.push(&packets::gpio(value));
            }
            CMD_WRGPIO => {
                let value = self.raw(registers::HST_GPIO_VAL);
                self.gpio_value = (self.gpio_value & !gpio_mask) | (value & gpio_mask);
            }
            CMD_CFGGPIO => {
                let value = self.raw(registers::HST_GPIO_VAL);
                self.gpio_config = (self.gpio_config & !gpio_mask) | (value & gpio_mask);
            }
            CMD_LPROF_RDXCVRREG => {
                let data = self.link_profile_registers.get(&lprof).copied().unwrap_or(0);
                self.push(&packets::link_profile(lprof.0, lprof.1, data));
            }
            CMD_LPROF_WRXCVRREG => {
                let data = self.raw(registers::HST_LPROF_DATA) as u16;
                self.link_profile_registers.insert(lprof, data);
            }
            CMD_CLRERR => {
                self.registers.insert((registers::MAC_ERROR, 0), 0);
            }
            CMD_NV_MEM_UPDATE => {
                let max = self.nv_max_packet_len;
                self.push(&packets::nv_config(max));
                self.push(&packets::end(0));
                self.nv_mode = true;
                let entry = self.nv_entry_status;
                self.push_nv_status(0, entry);
                return;
            }
            _ => {}
        }
        self.push(&packets::end(0));
    }

    fn push_nv_status(&mut self, re_cmd: u16, status: u32) {
        let mut packet = vec![0u8; nvupdate::HEADER_LEN + 8];
        LittleEndian::write_u16(&mut packet[0..2], nvupdate::MAGIC);
        LittleEndian::write_u16(&mut packet[2..4], nv_command::STATUS);
        LittleEndian::write_u16(&mut packet[4..6], 2);
        LittleEndian::write_u32(&mut packet[8..12], u32::from(re_cmd));
        LittleEndian::write_u32(&mut packet[12..16], status);
        self.push(&packet);
    }

    fn nv_packet(&mut self, data: &[u8]) {
        self.nv_packets.push(data.to_vec());
        let cmd = LittleEndian::read_u16(&data[2..4]);
        let status = match cmd {
            nv_command::UPD_RANGE => self.nv_statuses.pop_front().unwrap_or(nv_status::SUCCESS),
            nv_command::UPD_COMPLETE => {
                self.nv_mode = false;
                nv_status::SUCCESS
            }
            _ => nv_status::UNK_CMD,
        };
        self.push_nv_status(cmd, status);
    }
}

/// Cloneable handle to a shared simulated MAC.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimulatedMac {
    state: Arc<Mutex<MacState>>,
}

impl SimulatedMac {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut MacState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.with(|s| s.rx.extend(bytes.iter().copied()));
    }

    pub(crate) fn script(&self, command: u32, script: Script) {
        self.with(|s| s.scripts.entry(command).or_default().push_back(script));
    }

    pub(crate) fn set_register(&self, address: u16, value: u32) {
        self.with(|s| {
            s.registers.insert((address, 0), value);
        });
    }

    pub(crate) fn set_banked(&self, address: u16, bank: u32, value: u32) {
        self.with(|s| {
            s.registers.insert((address, bank), value);
        });
    }

    /// Report no data at all for `delay`.
    pub(crate) fn delay_responses(&self, delay: Duration) {
        self.with(|s| s.silent_until = Some(Instant::now() + delay));
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.written.clone())
    }

    pub(crate) fn commands(&self) -> Vec<u32> {
        self.with(|s| s.commands.clone())
    }
}

impl MacTransport for SimulatedMac {
    type Error = String;

    fn write(&mut self, data: &[u8]) -> Result<usize, String> {
        self.with(|s| {
            s.written.push(data.to_vec());
            if s.nv_mode {
                s.nv_packet(data);
            } else {
                for request in data.chunks(REGISTER_ACCESS_LEN) {
                    if request.len() != REGISTER_ACCESS_LEN {
                        return Err(format!("truncated register request {:02X?}", request));
                    }
                    s.register_access(request);
                }
            }
            Ok(data.len())
        })
    }

    fn bytes_available(&mut self) -> Result<usize, String> {
        Ok(self.with(|s| match s.silent_until {
            Some(until) if Instant::now() < until => 0,
            _ => s.rx.len(),
        }))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, String> {
        self.with(|s| {
            let wanted = buf.len();
            if s.rx.len() < wanted {
                return Err(format!("read of {} with {} ready", wanted, s.rx.len()));
            }
            for (dst, src) in buf.iter_mut().zip(s.rx.drain(..wanted)) {
                *dst = src;
            }
            s.reads += 1;
            Ok(buf.len())
        })
    }

    fn cancel(&mut self) -> Result<(), String> {
        self.with(|s| {
            s.cancels += 1;
            for packet in std::mem::take(&mut s.held) {
                s.push(&packet);
            }
        });
        Ok(())
    }

    fn abort(&mut self) -> Result<(), String> {
        self.with(|s| {
            s.aborts += 1;
            s.rx.clear();
            s.held.clear();
        });
        Ok(())
    }

    fn reset(&mut self, kind: ResetKind) -> Result<(), String> {
        self.with(|s| {
            s.resets.push(kind);
            s.rx.clear();
            s.held.clear();
            s.nv_mode = false;
        });
        Ok(())
    }

    fn characteristics(&self) -> TransportCharacteristics {
        TransportCharacteristics {
            driver_version: 1,
            max_buffer_size: 4096,
            max_packet_size: self.with(|s| s.max_packet_size),
        }
    }
}
