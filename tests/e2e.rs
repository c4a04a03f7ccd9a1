//! End-to-end scenarios E1-E6: the same literal values the design names,
//! driven through the public API rather than through any single module's
//! internals. E1 (cold boot) and E2 (direct load) are exercised as unit
//! tests alongside `boot.rs` since they need no cross-module wiring; E5
//! (disk round trip) is exercised alongside `disk.rs` for the same reason.
//! This file covers the scenarios that need the CPU, XIOS and `Context`
//! wired together: E3 (port dispatch) and E4 (bank select).

use mpm2em::context::Context;
use mpm2em::cpu::Cpu;
use mpm2em::memory::BankMemory;
use mpm2em::xios::Xios;
use std::sync::Arc;

fn cpu_with(program: &[u8]) -> Cpu {
    let mut mem = BankMemory::with_defaults();
    mem.bulk_load(0, 0x0000, program);
    Cpu::new(mem)
}

/// E3 - Port dispatch: `LD A,0x06; OUT (0xE0),A; IN A,(0xE0)` with an empty
/// console input queue yields A = 0x00; after pushing any byte, A = 0xFF.
#[test]
fn e3_port_dispatch_reflects_console_input_state() {
    let context = Arc::new(Context::new(1));
    let mut xios = Xios::new(context.clone(), 1);
    // LD C,0x00 (select console 0); LD A,0x06 (CONST); OUT (0xE0),A; IN A,(0xE0)
    let mut cpu = cpu_with(&[0x0E, 0x00, 0x3E, 0x06, 0xD3, 0xE0, 0xDB, 0xE0]);

    for _ in 0..4 {
        cpu.step(&mut xios).unwrap();
    }
    assert_eq!(cpu.regs.a, 0x00, "CONST on an empty input queue must return 0x00");

    context.consoles.get(0).unwrap().push_input(b'x');
    cpu.regs.pc = 0x0002; // rerun LD A,0x06; OUT (0xE0),A; IN A,(0xE0)
    for _ in 0..3 {
        cpu.step(&mut xios).unwrap();
    }
    assert_eq!(cpu.regs.a, 0xFF, "CONST on a non-empty input queue must return 0xFF");
}

/// E4 - Bank select: `OUT (0xE1), A` with `A = 3` makes subsequent reads from
/// `0x4000` equal to bank 3's content at `0x4000`, while `0xFFFE` (high
/// common) stays unchanged across any bank.
#[test]
fn e4_bank_select_port_switches_observed_bank() {
    let context = Arc::new(Context::new(1));
    let mut xios = Xios::new(context, 1);

    let mut mem = BankMemory::with_defaults();
    mem.write_in_bank(3, 0x4000, 0xAB);
    mem.write_in_bank(0, 0xFFFE, 0xCD);
    mem.bulk_load(0, 0x0000, &[0x3E, 0x03, 0xD3, 0xE1]); // LD A,0x03; OUT (0xE1),A
    let mut cpu = Cpu::new(mem);

    cpu.step(&mut xios).unwrap(); // LD A,0x03
    cpu.step(&mut xios).unwrap(); // OUT (0xE1),A -> select_bank(3)

    assert_eq!(cpu.memory.read(0x4000), 0xAB, "banked read must reflect the newly selected bank");
    assert_eq!(cpu.memory.read(0xFFFE), 0xCD, "high common must be unaffected by bank selection");
}

/// E6 (console half) - the SSH front end's only contract with the guest is
/// that bytes a session pushes land, in order, in the assigned console's
/// input queue; this drives that same path the way `SessionHandler::data`
/// does, without needing a live SSH transport.
#[test]
fn e6_bytes_pushed_toward_a_console_arrive_in_order() {
    let context = Arc::new(Context::new(2));
    let idx = context.consoles.first_free().unwrap();
    context.consoles.get(idx).unwrap().set_connected(true);

    let sent = b"stat\r";
    let console = context.consoles.get(idx).unwrap();
    for &b in sent {
        assert!(console.push_input(b));
    }

    let mut received = Vec::new();
    while let Some(b) = console.pop_input() {
        received.push(b);
    }
    assert_eq!(&received, sent);
}
