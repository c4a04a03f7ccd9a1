//! The full `CB`-prefixed table: rotate/shift group, `BIT`, `RES`, `SET`.
//! All 256 entries are implemented, including the undocumented `SLL`
//! (opcode group 0, y=6) since nothing here depends on it being absent.

use super::decode::decompose;
use super::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_PV, FLAG_S, FLAG_X, FLAG_Y, FLAG_Z};
use super::{alu, Cpu};
use crate::error::GuestFault;

pub fn execute(cpu: &mut Cpu, op: u8, _pc: u16) -> Result<(), GuestFault> {
    let f = decompose(op);
    let v = cpu.read_r(f.z);
    match f.x {
        0 => {
            let (result, carry) = rotate_shift(f.y, v, cpu.regs.flag(FLAG_C));
            cpu.write_r(f.z, result);
            set_shift_flags(cpu, result, carry);
        }
        1 => bit_test(cpu, f.y, v),
        2 => cpu.write_r(f.z, v & !(1 << f.y)),
        3 => cpu.write_r(f.z, v | (1 << f.y)),
        _ => unreachable!(),
    }
    Ok(())
}

fn rotate_shift(y: usize, v: u8, carry_in: bool) -> (u8, bool) {
    match y {
        0 => (v.rotate_left(1), v & 0x80 != 0),
        1 => (v.rotate_right(1), v & 0x01 != 0),
        2 => ((v << 1) | carry_in as u8, v & 0x80 != 0),
        3 => ((v >> 1) | ((carry_in as u8) << 7), v & 0x01 != 0),
        4 => (v << 1, v & 0x80 != 0),
        5 => ((v >> 1) | (v & 0x80), v & 0x01 != 0),
        6 => ((v << 1) | 1, v & 0x80 != 0), // undocumented SLL
        7 => (v >> 1, v & 0x01 != 0),
        _ => unreachable!(),
    }
}

fn set_shift_flags(cpu: &mut Cpu, result: u8, carry: bool) {
    let mut f = 0u8;
    if result & 0x80 != 0 {
        f |= FLAG_S;
    }
    if result == 0 {
        f |= FLAG_Z;
    }
    f |= result & (FLAG_Y | FLAG_X);
    if alu::parity_even(result) {
        f |= FLAG_PV;
    }
    if carry {
        f |= FLAG_C;
    }
    cpu.regs.f = f;
}

fn bit_test(cpu: &mut Cpu, bit: usize, v: u8) {
    let set = v & (1 << bit) != 0;
    let mut f = cpu.regs.f & FLAG_C;
    f |= FLAG_H;
    f |= v & (FLAG_Y | FLAG_X);
    if !set {
        f |= FLAG_Z | FLAG_PV;
    }
    if bit == 7 && set {
        f |= FLAG_S;
    }
    let _ = FLAG_N;
    cpu.regs.f = f;
}
