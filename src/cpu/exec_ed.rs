//! The `ED`-prefixed table, scoped to what an MP/M II guest actually issues
//! (design §4.2 open question): `IN`/`OUT (C)`, 16-bit `ADC`/`SBC`, the
//! extended `LD` forms, `NEG`, `RETN`/`RETI`, interrupt-mode selection, the
//! special registers, `RRD`/`RLD`, and the block transfer/search/IO group.
//! Rows the interpreter never needs (the `x=0`/`x=3` NOP rows and undefined
//! `z`/`y` combinations in the block group) fault as unimplemented rather
//! than silently behaving as a two-byte NOP.

use super::alu;
use super::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_PV, FLAG_S, FLAG_X, FLAG_Y, FLAG_Z};
use super::{Cpu, PortBus};
use crate::error::GuestFault;

const IM_TABLE: [u8; 8] = [0, 0, 1, 2, 0, 0, 1, 2];

pub fn execute(cpu: &mut Cpu, bus: &mut dyn PortBus, op: u8, pc: u16) -> Result<(), GuestFault> {
    let x = (op >> 6) & 0x03;
    let y = ((op >> 3) & 0x07) as usize;
    let z = (op & 0x07) as usize;
    let p = y >> 1;
    let q = y & 1;

    match x {
        1 => exec_row1(cpu, bus, z, y, p, q),
        2 if y >= 4 && z <= 3 => exec_block(cpu, bus, y, z),
        _ => return Err(GuestFault { pc, op }),
    }
    Ok(())
}

fn exec_row1(cpu: &mut Cpu, bus: &mut dyn PortBus, z: usize, y: usize, p: usize, q: usize) {
    match z {
        0 => {
            let v = bus.port_in(cpu, cpu.regs.c);
            if y != 6 {
                cpu.write_r(y, v);
            }
            let mut f = cpu.regs.f & FLAG_C;
            if v & 0x80 != 0 {
                f |= FLAG_S;
            }
            if v == 0 {
                f |= FLAG_Z;
            }
            f |= v & (FLAG_Y | FLAG_X);
            if alu::parity_even(v) {
                f |= FLAG_PV;
            }
            cpu.regs.f = f;
        }
        1 => {
            let v = if y == 6 { 0 } else { cpu.read_r(y) };
            bus.port_out(cpu, cpu.regs.c, v);
        }
        2 => {
            let hl = cpu.regs.hl();
            let rp = cpu.read_rp(p);
            let carry = cpu.regs.flag(FLAG_C);
            let (result, flags) = if q == 0 { alu::sbc16(hl, rp, carry) } else { alu::adc16(hl, rp, carry) };
            cpu.regs.set_hl(result);
            cpu.regs.f = flags;
        }
        3 => {
            let nn = cpu.fetch_word();
            if q == 0 {
                let rp = cpu.read_rp(p);
                cpu.memory.write(nn, (rp & 0xff) as u8);
                cpu.memory.write(nn.wrapping_add(1), (rp >> 8) as u8);
            } else {
                let lo = cpu.memory.read(nn);
                let hi = cpu.memory.read(nn.wrapping_add(1));
                cpu.write_rp(p, u16::from_le_bytes([lo, hi]));
            }
        }
        4 => {
            let a = cpu.regs.a;
            let (result, flags) = alu::sub8(0, a, false);
            cpu.regs.a = result;
            cpu.regs.f = flags;
        }
        5 => {
            cpu.iff1 = cpu.iff2;
            cpu.regs.pc = cpu.pop16();
            let _ = y;
        }
        6 => cpu.im = IM_TABLE[y],
        7 => exec_special(cpu, y),
        _ => unreachable!(),
    }
}

fn exec_special(cpu: &mut Cpu, y: usize) {
    match y {
        0 => cpu.regs.i = cpu.regs.a,
        1 => cpu.regs.r = cpu.regs.a,
        2 => {
            cpu.regs.a = cpu.regs.i;
            set_ir_flags(cpu, cpu.regs.i);
        }
        3 => {
            cpu.regs.a = cpu.regs.r;
            set_ir_flags(cpu, cpu.regs.r);
        }
        4 => rotate_digit(cpu, true),
        5 => rotate_digit(cpu, false),
        6 | 7 => {} // genuine two-byte NOPs in this row
        _ => unreachable!(),
    }
}

fn set_ir_flags(cpu: &mut Cpu, v: u8) {
    let mut f = cpu.regs.f & FLAG_C;
    if v & 0x80 != 0 {
        f |= FLAG_S;
    }
    if v == 0 {
        f |= FLAG_Z;
    }
    if cpu.iff2 {
        f |= FLAG_PV;
    }
    cpu.regs.f = f;
}

fn rotate_digit(cpu: &mut Cpu, left: bool) {
    let hl = cpu.regs.hl();
    let mem = cpu.memory.read(hl);
    let a = cpu.regs.a;
    let (new_a, new_mem) = if left {
        (
            (a & 0xf0) | (mem >> 4),
            (mem << 4) | (a & 0x0f),
        )
    } else {
        (
            (a & 0xf0) | (mem & 0x0f),
            (a << 4) | (mem >> 4),
        )
    };
    cpu.regs.a = new_a;
    cpu.memory.write(hl, new_mem);
    let mut f = cpu.regs.f & FLAG_C;
    if new_a & 0x80 != 0 {
        f |= FLAG_S;
    }
    if new_a == 0 {
        f |= FLAG_Z;
    }
    f |= new_a & (FLAG_Y | FLAG_X);
    if alu::parity_even(new_a) {
        f |= FLAG_PV;
    }
    cpu.regs.f = f;
}

fn exec_block(cpu: &mut Cpu, bus: &mut dyn PortBus, y: usize, z: usize) {
    // y=4/6 step HL (and DE) upward, y=5/7 step downward; y=6/7 repeat.
    let repeat = y >= 6;
    let decrement = y % 2 == 1;
    loop {
        let keep_going = match z {
            0 => block_transfer(cpu, decrement),
            1 => block_search(cpu, decrement),
            2 => block_input(cpu, bus, decrement),
            3 => block_output(cpu, bus, decrement),
            _ => unreachable!(),
        };
        if !repeat || !keep_going {
            break;
        }
    }
}

fn step_hl_de(cpu: &mut Cpu, decrement: bool) {
    let hl = cpu.regs.hl();
    let de = cpu.regs.de();
    cpu.regs.set_hl(if decrement { hl.wrapping_sub(1) } else { hl.wrapping_add(1) });
    cpu.regs.set_de(if decrement { de.wrapping_sub(1) } else { de.wrapping_add(1) });
}

fn block_transfer(cpu: &mut Cpu, decrement: bool) -> bool {
    let hl = cpu.regs.hl();
    let de = cpu.regs.de();
    let v = cpu.memory.read(hl);
    cpu.memory.write(de, v);
    step_hl_de(cpu, decrement);
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let mut f = cpu.regs.f & (FLAG_S | FLAG_Z | FLAG_C);
    if bc != 0 {
        f |= FLAG_PV;
    }
    cpu.regs.f = f;
    bc != 0
}

fn block_search(cpu: &mut Cpu, decrement: bool) -> bool {
    let hl = cpu.regs.hl();
    let v = cpu.memory.read(hl);
    let hl_next = if decrement { hl.wrapping_sub(1) } else { hl.wrapping_add(1) };
    cpu.regs.set_hl(hl_next);
    let bc = cpu.regs.bc().wrapping_sub(1);
    cpu.regs.set_bc(bc);
    let (result, sub_flags) = alu::sub8(cpu.regs.a, v, false);
    let mut f = sub_flags & (FLAG_S | FLAG_Z | FLAG_H | FLAG_N);
    if bc != 0 {
        f |= FLAG_PV;
    }
    f |= cpu.regs.f & FLAG_C;
    cpu.regs.f = f;
    let _ = result;
    bc != 0 && sub_flags & FLAG_Z == 0
}

fn block_input(cpu: &mut Cpu, bus: &mut dyn PortBus, decrement: bool) -> bool {
    let port = cpu.regs.c;
    let v = bus.port_in(cpu, port);
    let hl = cpu.regs.hl();
    cpu.memory.write(hl, v);
    cpu.regs.set_hl(if decrement { hl.wrapping_sub(1) } else { hl.wrapping_add(1) });
    let b = cpu.regs.b.wrapping_sub(1);
    cpu.regs.b = b;
    let mut f = cpu.regs.f & FLAG_C;
    if b == 0 {
        f |= FLAG_Z;
    }
    f |= FLAG_N;
    cpu.regs.f = f;
    b != 0
}

fn block_output(cpu: &mut Cpu, bus: &mut dyn PortBus, decrement: bool) -> bool {
    let hl = cpu.regs.hl();
    let v = cpu.memory.read(hl);
    cpu.regs.set_hl(if decrement { hl.wrapping_sub(1) } else { hl.wrapping_add(1) });
    let b = cpu.regs.b.wrapping_sub(1);
    cpu.regs.b = b;
    bus.port_out(cpu, cpu.regs.c, v);
    let mut f = cpu.regs.f & FLAG_C;
    if b == 0 {
        f |= FLAG_Z;
    }
    f |= FLAG_N;
    cpu.regs.f = f;
    b != 0
}
