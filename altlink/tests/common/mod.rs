//! A CMSIS-DAP probe with a Cortex-M0 behind it, simulated at the HID report level.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use altlink::probe::cmsisdap::commands::{CmsisDapDevice, HidTransport, SendError};
use altlink::{Config, DebugProbeInfo, Device};

pub const REPORT_SIZE: usize = 64;
pub const IDCODE: u32 = 0x0BB1_1477;
/// MEM-AP on an AMBA AHB bus, designed by ARM.
pub const AHB_AP_IDR: u32 = 0x0477_0021;
pub const ROM_BASE: u32 = 0xE00F_F000;
pub const SCS_BASE: u32 = 0xE000_E000;
pub const DWT_BASE: u32 = 0xE000_1000;
pub const BPU_BASE: u32 = 0xE000_2000;
pub const RAM_BASE: u32 = 0x2000_0000;

const ARM_PID: u64 = 0x04_000B_B000;
const ROM_CID: u32 = 0xB105_100D;
const GENERIC_IP_CID: u32 = 0xB105_E00D;

const ACK_OK: u8 = 0x01;
const ACK_FAULT: u8 = 0x04;

/// State of the simulated probe and target, shared with the transport handed to the driver.
#[derive(Debug)]
pub struct Target {
    /// Command ids of every report written, in order.
    pub commands: Vec<u8>,
    responses: VecDeque<Vec<u8>>,

    ctrl: u32,
    select: u32,
    pub sticky_error: bool,
    /// Clear requests, through DAP_WriteABORT or the ABORT register.
    pub aborts: usize,
    /// Number of upcoming AP transfers to answer with FAULT.
    pub faulting_ap_accesses: usize,

    csw: u32,
    tar: u32,
    pub memory: HashMap<u32, u32>,

    pub registers: [u32; 21],
    pub halted: bool,
    debugen: bool,
    maskints: bool,
    dcrdr: u32,
    pub demcr: u32,
    pub dhcsr_writes: Vec<u32>,
}

impl Target {
    fn new() -> Self {
        let mut target = Self {
            commands: Vec::new(),
            responses: VecDeque::new(),
            ctrl: 0,
            select: 0,
            sticky_error: false,
            aborts: 0,
            faulting_ap_accesses: 0,
            csw: 0x2300_0052,
            tar: 0,
            memory: HashMap::new(),
            registers: [0; 21],
            halted: false,
            debugen: false,
            maskints: false,
            dcrdr: 0,
            demcr: 0,
            dhcsr_writes: Vec::new(),
        };

        target.identify(ROM_BASE, ARM_PID | 0x4C4, ROM_CID);
        for (offset, entry) in [0xFFF0_F003u32, 0xFFF0_2003, 0xFFF0_3003, 0]
            .into_iter()
            .enumerate()
        {
            target.memory.insert(ROM_BASE + 4 * offset as u32, entry);
        }
        // MEMTYPE: system memory is present.
        target.memory.insert(ROM_BASE + 0xFCC, 0x1);

        target.identify(SCS_BASE, ARM_PID | 0x008, GENERIC_IP_CID);
        target.identify(DWT_BASE, ARM_PID | 0x00A, GENERIC_IP_CID);
        target.identify(BPU_BASE, ARM_PID | 0x00B, GENERIC_IP_CID);
        // Four code comparators.
        target.memory.insert(BPU_BASE, 0x0000_0040);

        for (index, register) in target.registers.iter_mut().enumerate() {
            *register = 0x1000_0000 + index as u32;
        }
        target
    }

    /// Store the peripheral and component ID registers of a component at `base`.
    fn identify(&mut self, base: u32, pid: u64, cid: u32) {
        for (i, offset) in [0xFE0, 0xFE4, 0xFE8, 0xFEC, 0xFD0].into_iter().enumerate() {
            self.memory
                .insert(base + offset, ((pid >> (8 * i)) & 0xFF) as u32);
        }
        for (i, offset) in [0xFF0, 0xFF4, 0xFF8, 0xFFC].into_iter().enumerate() {
            self.memory.insert(base + offset, (cid >> (8 * i)) & 0xFF);
        }
    }

    fn dhcsr(&self) -> u32 {
        let mut value = u32::from(self.debugen)
            | u32::from(self.halted) << 1
            | u32::from(self.maskints) << 3;
        if self.halted {
            // S_REGRDY and S_HALT.
            value |= 1 << 16 | 1 << 17;
        }
        value
    }

    fn read_bus(&self, address: u32) -> u32 {
        match address {
            0xE000_ED00 => 0x410C_C601,
            0xE000_EDF0 => self.dhcsr(),
            0xE000_EDF8 => self.dcrdr,
            0xE000_EDFC => self.demcr,
            // DWT PCSR
            0xE000_101C if self.halted => 0xFFFF_FFFF,
            0xE000_101C => self.registers[15],
            _ => self.memory.get(&address).copied().unwrap_or(0),
        }
    }

    fn write_bus(&mut self, address: u32, data: u32) {
        match address {
            0xE000_EDF0 => {
                self.dhcsr_writes.push(data);
                if data >> 16 == 0xA05F {
                    self.debugen = data & 0x1 != 0;
                    self.halted = data & 0x2 != 0 || data & 0x4 != 0;
                    self.maskints = data & 0x8 != 0;
                }
            }
            0xE000_EDF4 if self.halted => {
                let selector = (data & 0x7F) as usize;
                if let Some(register) = self.registers.get_mut(selector) {
                    if data & (1 << 16) != 0 {
                        *register = self.dcrdr;
                    } else {
                        self.dcrdr = *register;
                    }
                }
            }
            0xE000_EDF4 => {}
            0xE000_EDF8 => self.dcrdr = data,
            0xE000_EDFC => self.demcr = data,
            _ => {
                self.memory.insert(address, data);
            }
        }
    }

    /// A DRW access of the size programmed in CSW. Sub-word writes only touch their lanes.
    fn write_drw(&mut self, data: u32) {
        let word_address = self.tar & !0x3;
        let lanes = match self.csw & 0x7 {
            0 => 0xFFu32 << ((self.tar & 0x3) * 8),
            1 => 0xFFFFu32 << ((self.tar & 0x2) * 8),
            _ => 0xFFFF_FFFF,
        };
        let old = self.read_bus(word_address);
        self.write_bus(word_address, (old & !lanes) | (data & lanes));
    }

    fn read_dp(&self, address: u8) -> u32 {
        match address {
            0x0 => IDCODE,
            0x4 => {
                // Power-up acknowledges follow their requests.
                let requests = self.ctrl & 0x5000_0000;
                self.ctrl | requests << 1 | u32::from(self.sticky_error) << 5
            }
            _ => 0,
        }
    }

    fn write_dp(&mut self, address: u8, value: u32) {
        match address {
            0x0 => self.abort(value),
            0x4 => self.ctrl = value & 0xF000_0F00,
            0x8 => self.select = value,
            _ => {}
        }
    }

    fn abort(&mut self, value: u32) {
        if value & 0x4 != 0 {
            self.sticky_error = false;
        }
        self.aborts += 1;
    }

    fn ap_register(&self, address: u8) -> (u8, u8) {
        let apsel = (self.select >> 24) as u8;
        let bank = ((self.select >> 4) & 0xF) as u8;
        (apsel, bank << 4 | address)
    }

    fn read_ap(&mut self, address: u8) -> u32 {
        match self.ap_register(address) {
            (0, 0x00) => self.csw | 1 << 6,
            (0, 0x04) => self.tar,
            (0, 0x0C) => self.read_bus(self.tar & !0x3),
            (0, register @ 0x10..=0x1C) => {
                self.read_bus((self.tar & !0xF) + u32::from(register - 0x10))
            }
            (0, 0xF8) => ROM_BASE | 0x3,
            (0, 0xFC) => AHB_AP_IDR,
            _ => 0,
        }
    }

    fn write_ap(&mut self, address: u8, value: u32) {
        match self.ap_register(address) {
            (0, 0x00) => self.csw = value & !(1 << 6),
            (0, 0x04) => self.tar = value,
            (0, 0x0C) => self.write_drw(value),
            (0, register @ 0x10..=0x1C) => {
                let address = (self.tar & !0xF) + u32::from(register - 0x10);
                self.write_bus(address, value);
            }
            _ => {}
        }
    }

    /// DAP_Transfer: `request` starts at the DAP index.
    fn transfer(&mut self, request: &[u8]) -> Vec<u8> {
        let count = request[1] as usize;
        let mut data = Vec::new();
        let mut position = 2;
        let mut executed = 0;
        let mut ack = ACK_OK;

        for _ in 0..count {
            let command = request[position];
            position += 1;
            let access_port = command & 0x1 != 0;
            let read = command & 0x2 != 0;
            let address = command & 0x0C;
            let value = if read {
                0
            } else {
                let value = u32::from_le_bytes([
                    request[position],
                    request[position + 1],
                    request[position + 2],
                    request[position + 3],
                ]);
                position += 4;
                value
            };
            executed += 1;

            if access_port && (self.sticky_error || self.faulting_ap_accesses > 0) {
                self.faulting_ap_accesses = self.faulting_ap_accesses.saturating_sub(1);
                self.sticky_error = true;
                ack = ACK_FAULT;
                break;
            }

            match (access_port, read) {
                (false, true) => data.extend_from_slice(&self.read_dp(address).to_le_bytes()),
                (false, false) => self.write_dp(address, value),
                (true, true) => data.extend_from_slice(&self.read_ap(address).to_le_bytes()),
                (true, false) => self.write_ap(address, value),
            }
        }

        let mut response = vec![0x05, executed, ack];
        response.extend(data);
        response
    }

    fn info(id: u8) -> Vec<u8> {
        match id {
            0x01 => vec![0x00, 0x04, b'A', b'R', b'M', 0x00],
            0x04 => vec![0x00, 0x04, b'2', b'.', b'1', 0x00],
            0xF0 => vec![0x00, 0x01, 0x03],
            0xFE => vec![0x00, 0x01, 0x04],
            0xFF => vec![0x00, 0x02, REPORT_SIZE as u8, 0x00],
            _ => vec![0x00, 0x00],
        }
    }

    /// Answer one report. `report[0]` is the HID report id.
    fn handle(&mut self, report: &[u8]) -> Vec<u8> {
        let command = report[1];
        self.commands.push(command);
        match command {
            0x00 => Self::info(report[2]),
            0x02 => vec![0x02, if report[2] == 2 { 0x02 } else { 0x01 }],
            0x05 => self.transfer(&report[2..]),
            0x08 => {
                let abort = u32::from_le_bytes([report[3], report[4], report[5], report[6]]);
                self.abort(abort);
                vec![0x08, 0x00]
            }
            0x10 => vec![0x10, 0xA3],
            0x01 | 0x03 | 0x04 | 0x11 | 0x12 | 0x13 => vec![command, 0x00],
            _ => vec![0xFF],
        }
    }
}

/// The probe end of the simulation, cheap to clone.
#[derive(Clone)]
pub struct SimulatedProbe {
    target: Arc<Mutex<Target>>,
}

impl SimulatedProbe {
    pub fn new() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::new())),
        }
    }

    pub fn target(&self) -> MutexGuard<'_, Target> {
        self.target.lock().unwrap()
    }

    pub fn device(&self) -> CmsisDapDevice {
        CmsisDapDevice::new(Box::new(self.clone()), Duration::from_millis(100))
    }

    pub fn info() -> DebugProbeInfo {
        DebugProbeInfo {
            path: "simulated".to_owned(),
            product_string: "Simulated CMSIS-DAP".to_owned(),
            serial_number: Some("0001".to_owned()),
            vendor_id: 0x0d28,
            product_id: 0x0204,
        }
    }

    /// A device opened on this probe with the default configuration.
    pub fn open(&self) -> Device {
        let mut device = Device::new(Self::info(), Config::default());
        device.open_with(self.device()).unwrap();
        device
    }
}

impl HidTransport for SimulatedProbe {
    fn write(&mut self, buf: &[u8]) -> Result<usize, SendError> {
        let mut target = self.target();
        let mut response = target.handle(buf);
        response.resize(REPORT_SIZE, 0);
        target.responses.push_back(response);
        Ok(buf.len())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, SendError> {
        match self.target().responses.pop_front() {
            Some(response) => {
                let len = response.len().min(buf.len());
                buf[..len].copy_from_slice(&response[..len]);
                Ok(len)
            }
            None => Ok(0),
        }
    }
}
