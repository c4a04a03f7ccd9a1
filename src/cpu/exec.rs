//! The unprefixed main opcode table (256 entries), decoded through the
//! standard `xxyyyzzz` / `ppq` bitfields rather than a hand-written
//! 256-way match — the same shape a disassembler table would use, just
//! collapsed into a single fetch-decode-execute pass since this interpreter
//! has no debugger/disassembly surface to justify a separate decode stage.

use super::alu;
use super::decode::decompose;
use super::exec_cb;
use super::exec_ed;
use super::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_PV, FLAG_S, FLAG_X, FLAG_Y, FLAG_Z};
use super::{Cpu, PortBus};
use crate::error::GuestFault;

pub fn execute(cpu: &mut Cpu, bus: &mut dyn PortBus, op: u8, pc: u16) -> Result<(), GuestFault> {
    if op == 0xCB {
        let sub = cpu.fetch_byte();
        return exec_cb::execute(cpu, sub, pc);
    }
    if op == 0xED {
        let sub = cpu.fetch_byte();
        return exec_ed::execute(cpu, bus, sub, pc);
    }
    if op == 0xDD || op == 0xFD {
        // IX/IY-prefixed forms are out of scope (design §4.2 open question).
        return Err(GuestFault { pc, op });
    }

    let f = decompose(op);

    match f.x {
        0 => exec_x0(cpu, bus, f, op, pc),
        1 => exec_x1(cpu, f, op, pc),
        2 => exec_x2(cpu, f),
        3 => exec_x3(cpu, bus, f, op, pc),
        _ => unreachable!(),
    }
}

fn jr_if(cpu: &mut Cpu, take: bool) {
    let d = cpu.fetch_byte() as i8;
    if take {
        cpu.regs.pc = cpu.regs.pc.wrapping_add(d as i16 as u16);
    }
}

fn exec_x0(
    cpu: &mut Cpu,
    bus: &mut dyn PortBus,
    f: super::decode::Fields,
    op: u8,
    pc: u16,
) -> Result<(), GuestFault> {
    match f.z {
        0 => match f.y {
            0 => {} // NOP
            1 => cpu.regs.ex_af(),
            2 => {
                cpu.regs.b = cpu.regs.b.wrapping_sub(1);
                let take = cpu.regs.b != 0;
                jr_if(cpu, take);
            }
            3 => jr_if(cpu, true),
            4..=7 => {
                let take = cpu.eval_cc(f.y - 4);
                jr_if(cpu, take);
            }
            _ => unreachable!(),
        },
        1 => {
            if f.q == 0 {
                let nn = cpu.fetch_word();
                cpu.write_rp(f.p, nn);
            } else {
                let hl = cpu.regs.hl();
                let rp = cpu.read_rp(f.p);
                let (result, flags) = alu::add16(hl, rp);
                cpu.regs.set_hl(result);
                cpu.regs.f = (cpu.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | flags;
            }
        }
        2 => exec_indirect_ld(cpu, f.p, f.q),
        3 => {
            let rp = cpu.read_rp(f.p);
            cpu.write_rp(f.p, if f.q == 0 { rp.wrapping_add(1) } else { rp.wrapping_sub(1) });
        }
        4 => {
            let v = cpu.read_r(f.y);
            let (result, flags) = alu::inc8(v, cpu.regs.flag(FLAG_C));
            cpu.write_r(f.y, result);
            cpu.regs.f = flags;
        }
        5 => {
            let v = cpu.read_r(f.y);
            let (result, flags) = alu::dec8(v, cpu.regs.flag(FLAG_C));
            cpu.write_r(f.y, result);
            cpu.regs.f = flags;
        }
        6 => {
            let n = cpu.fetch_byte();
            cpu.write_r(f.y, n);
        }
        7 => exec_accumulator_op(cpu, f.y),
        _ => unreachable!(),
    }
    let _ = (bus, op, pc);
    Ok(())
}

fn exec_indirect_ld(cpu: &mut Cpu, p: usize, q: usize) {
    match (p, q) {
        (0, 0) => {
            let bc = cpu.regs.bc();
            cpu.memory.write(bc, cpu.regs.a);
        }
        (1, 0) => {
            let de = cpu.regs.de();
            cpu.memory.write(de, cpu.regs.a);
        }
        (2, 0) => {
            let nn = cpu.fetch_word();
            let hl = cpu.regs.hl();
            cpu.memory.write(nn, (hl & 0xff) as u8);
            cpu.memory.write(nn.wrapping_add(1), (hl >> 8) as u8);
        }
        (3, 0) => {
            let nn = cpu.fetch_word();
            cpu.memory.write(nn, cpu.regs.a);
        }
        (0, 1) => {
            let bc = cpu.regs.bc();
            cpu.regs.a = cpu.memory.read(bc);
        }
        (1, 1) => {
            let de = cpu.regs.de();
            cpu.regs.a = cpu.memory.read(de);
        }
        (2, 1) => {
            let nn = cpu.fetch_word();
            let lo = cpu.memory.read(nn);
            let hi = cpu.memory.read(nn.wrapping_add(1));
            cpu.regs.set_hl(u16::from_le_bytes([lo, hi]));
        }
        (3, 1) => {
            let nn = cpu.fetch_word();
            cpu.regs.a = cpu.memory.read(nn);
        }
        _ => unreachable!(),
    }
}

fn exec_accumulator_op(cpu: &mut Cpu, y: usize) {
    match y {
        0 => {
            // RLCA
            let a = cpu.regs.a;
            let carry = a & 0x80 != 0;
            let result = a.rotate_left(1);
            cpu.regs.a = result;
            set_rotate_flags(cpu, result, carry);
        }
        1 => {
            // RRCA
            let a = cpu.regs.a;
            let carry = a & 0x01 != 0;
            let result = a.rotate_right(1);
            cpu.regs.a = result;
            set_rotate_flags(cpu, result, carry);
        }
        2 => {
            // RLA
            let a = cpu.regs.a;
            let carry_in = cpu.regs.flag(FLAG_C) as u8;
            let carry = a & 0x80 != 0;
            let result = (a << 1) | carry_in;
            cpu.regs.a = result;
            set_rotate_flags(cpu, result, carry);
        }
        3 => {
            // RRA
            let a = cpu.regs.a;
            let carry_in = cpu.regs.flag(FLAG_C) as u8;
            let carry = a & 0x01 != 0;
            let result = (a >> 1) | (carry_in << 7);
            cpu.regs.a = result;
            set_rotate_flags(cpu, result, carry);
        }
        4 => daa(cpu),
        5 => {
            // CPL
            cpu.regs.a = !cpu.regs.a;
            cpu.regs.f |= FLAG_H | FLAG_N;
            cpu.regs.f = (cpu.regs.f & !(FLAG_Y | FLAG_X)) | (cpu.regs.a & (FLAG_Y | FLAG_X));
        }
        6 => {
            // SCF
            cpu.regs.f = (cpu.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | FLAG_C
                | (cpu.regs.a & (FLAG_Y | FLAG_X));
        }
        7 => {
            // CCF
            let old_c = cpu.regs.flag(FLAG_C);
            cpu.regs.f = (cpu.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | (cpu.regs.a & (FLAG_Y | FLAG_X));
            if old_c {
                cpu.regs.f |= FLAG_H;
            } else {
                cpu.regs.f |= FLAG_C;
            }
        }
        _ => unreachable!(),
    }
}

fn set_rotate_flags(cpu: &mut Cpu, result: u8, carry: bool) {
    cpu.regs.f = (cpu.regs.f & (FLAG_S | FLAG_Z | FLAG_PV)) | (result & (FLAG_Y | FLAG_X));
    if carry {
        cpu.regs.f |= FLAG_C;
    }
}

fn daa(cpu: &mut Cpu) {
    let a = cpu.regs.a;
    let n = cpu.regs.flag(FLAG_N);
    let h = cpu.regs.flag(FLAG_H);
    let c = cpu.regs.flag(FLAG_C);

    let mut diff = 0u8;
    if h || (a & 0x0f) > 9 {
        diff |= 0x06;
    }
    if c || a > 0x99 {
        diff |= 0x60;
    }
    let new_c = c || a > 0x99;
    let new_h = if n { h && (a & 0x0f) < 6 } else { (a & 0x0f) > 9 };
    let result = if n { a.wrapping_sub(diff) } else { a.wrapping_add(diff) };

    cpu.regs.a = result;
    let mut f = 0u8;
    if result & 0x80 != 0 {
        f |= FLAG_S;
    }
    if result == 0 {
        f |= FLAG_Z;
    }
    f |= result & (FLAG_Y | FLAG_X);
    if new_h {
        f |= FLAG_H;
    }
    if alu::parity_even(result) {
        f |= FLAG_PV;
    }
    if n {
        f |= FLAG_N;
    }
    if new_c {
        f |= FLAG_C;
    }
    cpu.regs.f = f;
}

fn exec_x1(cpu: &mut Cpu, f: super::decode::Fields, op: u8, pc: u16) -> Result<(), GuestFault> {
    if f.z == 6 && f.y == 6 {
        cpu.halted = true;
        return Ok(());
    }
    let v = cpu.read_r(f.z);
    cpu.write_r(f.y, v);
    let _ = (op, pc);
    Ok(())
}

fn exec_x2(cpu: &mut Cpu, f: super::decode::Fields) -> Result<(), GuestFault> {
    let v = cpu.read_r(f.z);
    apply_alu(cpu, f.y, v);
    Ok(())
}

fn apply_alu(cpu: &mut Cpu, y: usize, v: u8) {
    let a = cpu.regs.a;
    let (result, flags) = match y {
        0 => alu::add8(a, v, false),
        1 => alu::add8(a, v, cpu.regs.flag(FLAG_C)),
        2 => alu::sub8(a, v, false),
        3 => alu::sub8(a, v, cpu.regs.flag(FLAG_C)),
        4 => alu::and8(a, v),
        5 => alu::xor8(a, v),
        6 => alu::or8(a, v),
        7 => alu::sub8(a, v, false), // CP: compare only, discard result
        _ => unreachable!(),
    };
    cpu.regs.f = flags;
    if y != 7 {
        cpu.regs.a = result;
    }
}

fn exec_x3(
    cpu: &mut Cpu,
    bus: &mut dyn PortBus,
    f: super::decode::Fields,
    op: u8,
    pc: u16,
) -> Result<(), GuestFault> {
    match f.z {
        0 => {
            if cpu.eval_cc(f.y) {
                cpu.regs.pc = cpu.pop16();
            }
        }
        1 => {
            if f.q == 0 {
                let v = cpu.pop16();
                cpu.write_rp2(f.p, v);
            } else {
                match f.p {
                    0 => cpu.regs.pc = cpu.pop16(),
                    1 => cpu.regs.exx(),
                    2 => cpu.regs.pc = cpu.regs.hl(),
                    3 => cpu.regs.sp = cpu.regs.hl(),
                    _ => unreachable!(),
                }
            }
        }
        2 => {
            let nn = cpu.fetch_word();
            if cpu.eval_cc(f.y) {
                cpu.regs.pc = nn;
            }
        }
        3 => match f.y {
            0 => {
                let nn = cpu.fetch_word();
                cpu.regs.pc = nn;
            }
            1 => unreachable!("CB prefix handled before decomposition"),
            2 => {
                let n = cpu.fetch_byte();
                bus.port_out(cpu, n, cpu.regs.a);
            }
            3 => {
                let n = cpu.fetch_byte();
                cpu.regs.a = bus.port_in(cpu, n);
            }
            4 => {
                let sp = cpu.regs.sp;
                let lo = cpu.memory.read(sp);
                let hi = cpu.memory.read(sp.wrapping_add(1));
                let hl = cpu.regs.hl();
                cpu.memory.write(sp, (hl & 0xff) as u8);
                cpu.memory.write(sp.wrapping_add(1), (hl >> 8) as u8);
                cpu.regs.set_hl(u16::from_le_bytes([lo, hi]));
            }
            5 => {
                let de = cpu.regs.de();
                let hl = cpu.regs.hl();
                cpu.regs.set_de(hl);
                cpu.regs.set_hl(de);
            }
            6 => {
                cpu.iff1 = false;
                cpu.iff2 = false;
            }
            7 => {
                cpu.iff1 = true;
                cpu.iff2 = true;
                cpu.request_ei_delay();
            }
            _ => unreachable!(),
        },
        4 => {
            let nn = cpu.fetch_word();
            if cpu.eval_cc(f.y) {
                cpu.push16(cpu.regs.pc);
                cpu.regs.pc = nn;
            }
        }
        5 => {
            if f.q == 0 {
                let v = cpu.read_rp2(f.p);
                cpu.push16(v);
            } else {
                match f.p {
                    0 => {
                        let nn = cpu.fetch_word();
                        cpu.push16(cpu.regs.pc);
                        cpu.regs.pc = nn;
                    }
                    1 | 3 => return Err(GuestFault { pc, op }), // DD/FD prefixes
                    2 => {
                        let sub = cpu.fetch_byte();
                        return exec_ed::execute(cpu, bus, sub, pc);
                    }
                    _ => unreachable!(),
                }
            }
        }
        6 => {
            let n = cpu.fetch_byte();
            apply_alu(cpu, f.y, n);
        }
        7 => {
            cpu.push16(cpu.regs.pc);
            cpu.regs.pc = (f.y as u16) * 8;
        }
        _ => unreachable!(),
    }
    Ok(())
}
