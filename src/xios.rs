//! XIOS dispatch (component E): the `PortBus` implementation that answers
//! the three port-trap ABI addresses from design §4.2 and, for
//! `XIOS_DISPATCH`, fans out to the BIOS+extended entry table of §4.5.
//!
//! The guest reaches these entries through small stubs the boot loader
//! installs at each vector slot (`LD A,<offset>; OUT (0xE0),A; RET`) —
//! this interpreter never executes hand-written Z80 BIOS code for disk or
//! console handling, only the guest's own stub that traps here.

use crate::bridge::{BridgeReply, MAILBOX_SIZE};
use crate::context::Context;
use crate::cpu::{Cpu, PortBus};
use crate::error::GuestIoError;
use std::sync::Arc;
use tracing::{debug, warn};

pub const XIOS_DISPATCH: u8 = 0xE0;
pub const BANK_SELECT: u8 = 0xE1;
pub const SIGNAL: u8 = 0xE2;

pub mod offset {
    pub const BOOT: u8 = 0x00;
    pub const WBOOT: u8 = 0x03;
    pub const CONST: u8 = 0x06;
    pub const CONIN: u8 = 0x09;
    pub const CONOUT: u8 = 0x0C;
    pub const LIST: u8 = 0x0F;
    pub const PUNCH: u8 = 0x12;
    pub const READER: u8 = 0x15;
    pub const HOME: u8 = 0x18;
    pub const SELDSK: u8 = 0x1B;
    pub const SETTRK: u8 = 0x1E;
    pub const SETSEC: u8 = 0x21;
    pub const SETDMA: u8 = 0x24;
    pub const READ: u8 = 0x27;
    pub const WRITE: u8 = 0x2A;
    pub const LISTST: u8 = 0x2D;
    pub const SECTRAN: u8 = 0x30;
    pub const SELMEMORY: u8 = 0x33;
    pub const POLLDEVICE: u8 = 0x36;
    pub const STARTCLOCK: u8 = 0x39;
    pub const STOPCLOCK: u8 = 0x3C;
    pub const EXITREGION: u8 = 0x3F;
    pub const MAXCONSOLE: u8 = 0x42;
    pub const SYSTEMINIT: u8 = 0x45;
    pub const IDLE: u8 = 0x48;
}

/// Assumed offset, within the banked XIOS, of the guest interrupt handler
/// `SYSTEMINIT` installs at `0x0038`. Not named in the dispatch table
/// (only the documented entries end at `IDLE`); picked as the next free
/// jump-table slot, consistent with the historical BIOS vector spacing of
/// 3 bytes per entry. See DESIGN.md for this open-question resolution.
const INTHND_OFFSET: u16 = 0x4B;

/// Fixed 256-byte mailbox address in high common, picked (and documented
/// as an open-question resolution in DESIGN.md) since the spec leaves the
/// exact guest-resident staging address unspecified. Byte 0 is the status
/// cell the guest RSP and this layer both poll: idle, request-pending, or
/// reply-pending.
const BRIDGE_MAILBOX_ADDR: u16 = 0xFE00;
const BRIDGE_STATUS_IDLE: u8 = 0;
const BRIDGE_STATUS_REQUEST: u8 = 1;
const BRIDGE_STATUS_REPLY: u8 = 2;

pub struct Xios {
    context: Arc<Context>,
    console_count: usize,
    dispatch_latch: u8,
    signal_latch: u8,
    dma_bank: usize,
    pending_bridge_id: Option<u32>,
    /// The banked XIOS base a direct-loaded image declared in its SYSDAT
    /// (design §3); `SYSTEMINIT` uses it to site the installed interrupt
    /// vector. Defaults to the memory layer's high-common base, which is
    /// the right answer for a cold-booted image that never calls
    /// `SYSTEMINIT` via a loaded SYSDAT at all.
    bnkxios_base: u16,
}

impl Xios {
    pub fn new(context: Arc<Context>, console_count: usize) -> Self {
        Xios {
            context,
            console_count,
            dispatch_latch: 0,
            signal_latch: 0,
            dma_bank: 0,
            pending_bridge_id: None,
            bnkxios_base: crate::memory::DEFAULT_HIGH_COMMON_BASE,
        }
    }

    pub fn set_bnkxios_base(&mut self, addr: u16) {
        self.bnkxios_base = addr;
    }

    /// Invoke a dispatch entry directly from host code rather than through
    /// a trapped `OUT (0xE0),A` — used by the boot loader to run
    /// `SYSTEMINIT` before the interpreter's fetch/execute loop starts.
    pub fn invoke(&mut self, cpu: &mut Cpu, off: u8) -> u8 {
        self.dispatch(cpu, off)
    }

    fn dispatch(&mut self, cpu: &mut Cpu, off: u8) -> u8 {
        use offset::*;
        match off {
            BOOT | WBOOT => 0,
            CONST => {
                let console = cpu.regs.c as usize;
                match self.context.consoles.get(console) {
                    Some(c) if c.input_ready() => 0xFF,
                    _ => 0x00,
                }
            }
            CONIN => {
                let console = cpu.regs.c as usize;
                self.context.consoles.get(console).and_then(|c| c.pop_input()).unwrap_or(0x1A) // Ctrl-Z: EOF sentinel when polled with nothing queued
            }
            CONOUT => {
                let console = cpu.regs.c as usize;
                let ch = cpu.regs.e;
                if let Some(c) = self.context.consoles.get(console) {
                    c.push_output(ch);
                }
                0
            }
            LIST => 0,
            PUNCH | READER | HOME => 0,
            SELDSK => {
                let drive = cpu.regs.c as usize;
                let mut disks = self.context.disks.lock().unwrap();
                match disks.select(drive) {
                    Ok(()) => {
                        cpu.regs.set_hl(0x0001); // sentinel: a real DPH body isn't modelled
                        0
                    }
                    Err(e) => {
                        cpu.regs.set_hl(0x0000);
                        e.guest_code()
                    }
                }
            }
            SETTRK => {
                let t = cpu.regs.de();
                let mut disks = self.context.disks.lock().unwrap();
                guest_code_of(disks.set_track(t))
            }
            SETSEC => {
                let s = cpu.regs.de();
                let mut disks = self.context.disks.lock().unwrap();
                guest_code_of(disks.set_sector(s))
            }
            SETDMA => {
                let addr = cpu.regs.de();
                let bank = self.dma_bank;
                let mut disks = self.context.disks.lock().unwrap();
                guest_code_of(disks.set_dma(bank, addr))
            }
            READ => self.read_sector(cpu),
            WRITE => self.write_sector(cpu),
            LISTST => 0xFF,
            SECTRAN => {
                let logical = cpu.regs.de();
                let mut disks = self.context.disks.lock().unwrap();
                match disks.translate(logical) {
                    Ok(physical) => {
                        cpu.regs.set_hl(physical);
                        0
                    }
                    Err(e) => e.guest_code(),
                }
            }
            SELMEMORY => {
                let bank = cpu.regs.c as usize;
                cpu.memory.select_bank(bank);
                self.dma_bank = bank;
                0
            }
            POLLDEVICE => {
                let device = cpu.regs.c as usize;
                let console_idx = device / 2;
                let ready = match self.context.consoles.get(console_idx) {
                    Some(c) if device % 2 == 1 => c.input_ready(),
                    Some(c) => c.output_has_space(),
                    None => false,
                };
                if ready {
                    0xFF
                } else {
                    0x00
                }
            }
            STARTCLOCK => {
                self.context.set_clock_enabled(true);
                0
            }
            STOPCLOCK => {
                self.context.set_clock_enabled(false);
                0
            }
            EXITREGION => 0,
            MAXCONSOLE => (self.console_count.saturating_sub(1)) as u8,
            SYSTEMINIT => {
                self.install_interrupt_vector(cpu);
                0
            }
            IDLE => 0,
            _ => {
                warn!(offset = format!("{:#04x}", off), "unknown XIOS dispatch offset");
                0
            }
        }
    }

    fn install_interrupt_vector(&self, cpu: &mut Cpu) {
        let target = self.bnkxios_base.wrapping_add(INTHND_OFFSET);
        let jp = [0xC3u8, (target & 0xff) as u8, (target >> 8) as u8];
        for bank in 0..cpu.memory.bank_count() {
            cpu.memory.bulk_load(bank, 0x0038, &jp);
        }
        cpu.im = 1;
        cpu.iff1 = true;
        cpu.iff2 = true;
        debug!(target = format!("{:#06x}", target), "installed interrupt vector at 0x0038");
    }

    fn read_sector(&mut self, cpu: &mut Cpu) -> u8 {
        let mut disks = self.context.disks.lock().unwrap();
        let (bank, addr) = match disks.dma_target() {
            Ok(t) => t,
            Err(e) => return e.guest_code(),
        };
        match disks.read_sector() {
            Ok(bytes) => {
                drop(disks);
                cpu.memory.bulk_load(bank, addr, &bytes);
                0
            }
            Err(e) => e.guest_code(),
        }
    }

    fn write_sector(&mut self, cpu: &mut Cpu) -> u8 {
        let (bank, addr, len) = {
            let disks = self.context.disks.lock().unwrap();
            let (bank, addr) = match disks.dma_target() {
                Ok(t) => t,
                Err(e) => return e.guest_code(),
            };
            (bank, addr, disks.sector_size_hint())
        };
        let len = match len {
            Some(l) => l,
            None => return GuestIoError::NoSuchDrive.guest_code(),
        };
        let mut bytes = Vec::with_capacity(len);
        let mut a = addr;
        for _ in 0..len {
            bytes.push(cpu.memory.read_in_bank(bank, a));
            a = a.wrapping_add(1);
        }
        let mut disks = self.context.disks.lock().unwrap();
        guest_code_of(disks.write_sector(&bytes))
    }

    /// Periodic host-side call (via the runner, once per tick): copy a
    /// pending host request into the guest-resident mailbox, or pick up
    /// and forward a reply the guest RSP has already written there.
    pub fn service_bridge(&mut self, cpu: &mut Cpu) {
        let status = cpu.memory.read(BRIDGE_MAILBOX_ADDR);
        if status == BRIDGE_STATUS_REPLY {
            if let Some(id) = self.pending_bridge_id.take() {
                let mut body = [0u8; MAILBOX_SIZE - 1];
                for (i, b) in body.iter_mut().enumerate() {
                    *b = cpu.memory.read(BRIDGE_MAILBOX_ADDR + 1 + i as u16);
                }
                if let Some(reply) = BridgeReply::from_wire(id, &body) {
                    self.context.bridge.deliver_reply(reply);
                }
            }
            cpu.memory.write(BRIDGE_MAILBOX_ADDR, BRIDGE_STATUS_IDLE);
            return;
        }
        if status == BRIDGE_STATUS_IDLE && self.pending_bridge_id.is_none() {
            if let Some(req) = self.context.bridge.take_request() {
                self.pending_bridge_id = Some(req.id);
                let wire = req.to_wire();
                for (i, b) in wire.iter().enumerate() {
                    cpu.memory.write(BRIDGE_MAILBOX_ADDR + 1 + i as u16, *b);
                }
                cpu.memory.write(BRIDGE_MAILBOX_ADDR, BRIDGE_STATUS_REQUEST);
            }
        }
    }
}

fn guest_code_of(result: Result<(), GuestIoError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => e.guest_code(),
    }
}

impl PortBus for Xios {
    fn port_out(&mut self, cpu: &mut Cpu, port: u8, value: u8) {
        match port {
            XIOS_DISPATCH => {
                self.dispatch_latch = self.dispatch(cpu, value);
            }
            BANK_SELECT => {
                cpu.memory.select_bank(value as usize);
                self.dma_bank = value as usize;
            }
            SIGNAL => {
                self.signal_latch = 0;
            }
            _ => {}
        }
    }

    fn port_in(&mut self, _cpu: &mut Cpu, port: u8) -> u8 {
        match port {
            XIOS_DISPATCH => self.dispatch_latch,
            SIGNAL => self.signal_latch,
            _ => 0xFF,
        }
    }
}
