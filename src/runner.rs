//! Tick scheduler and clock (component G). Drives the interpreter in
//! fixed-size instruction batches, injects the periodic `RST 38H`, and
//! honours the cooperative shutdown and wall-clock timeout contracts of
//! design §5.

use crate::context::Context;
use crate::cpu::Cpu;
use crate::error::GuestFault;
use crate::xios::Xios;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Nominal scheduling quantum: one 60 Hz period.
pub const QUANTUM: Duration = Duration::from_micros(16_667);
/// Minimum cycles between accepted interrupts (design §4.2): roughly one
/// 60 Hz period at 4 MHz, expressed in this interpreter's nominal cycle
/// unit rather than true T-states (timing fidelity is an explicit non-goal).
pub const MIN_CYCLES_BETWEEN_INTERRUPTS: u64 = 66_667;
pub const INSTRUCTIONS_PER_QUANTUM: u32 = 10_000;
pub const TICKS_PER_SECOND: u32 = 60;
/// If the guest never calls `STARTCLOCK`, enable it anyway after this many
/// executed instructions — a historical safety net (design §9 Open
/// Questions #1), not a declared contract.
pub const AUTO_START_INSTRUCTIONS: u64 = 5_000_000;

pub struct Runner {
    context: Arc<Context>,
    last_interrupt_cycle: u64,
    tick_count: u64,
    instructions_executed: u64,
    auto_started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TimedOut,
    Fault,
}

impl Runner {
    pub fn new(context: Arc<Context>) -> Self {
        Runner {
            context,
            last_interrupt_cycle: 0,
            tick_count: 0,
            instructions_executed: 0,
            auto_started: false,
        }
    }

    /// Run until `stop_requested`, a wall-clock timeout, or a guest fault.
    /// `timeout` of `None` means run indefinitely.
    pub fn run(&mut self, cpu: &mut Cpu, xios: &mut Xios, timeout: Option<Duration>) -> Result<StopReason, GuestFault> {
        let start = Instant::now();
        loop {
            if self.context.stop_requested() {
                return Ok(StopReason::Requested);
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    self.context.set_timed_out();
                    return Ok(StopReason::TimedOut);
                }
            }

            self.run_quantum(cpu, xios)?;
            xios.service_bridge(cpu);

            self.tick_count += 1;
            if self.tick_count % TICKS_PER_SECOND as u64 == 0 {
                // the one-second guest flag: surfaced to XIOS callers via
                // the tick count rather than a separate latched byte,
                // since nothing in the dispatch table reads it directly
                // yet (design leaves its consumer to STARTCLOCK users).
            }
        }
    }

    fn run_quantum(&mut self, cpu: &mut Cpu, xios: &mut Xios) -> Result<(), GuestFault> {
        let quantum_start = Instant::now();

        if self.context.clock_enabled()
            && cpu.interrupt_ready()
            && cpu.cycles.saturating_sub(self.last_interrupt_cycle) >= MIN_CYCLES_BETWEEN_INTERRUPTS
        {
            cpu.accept_interrupt();
            self.last_interrupt_cycle = cpu.cycles;
        }

        for _ in 0..INSTRUCTIONS_PER_QUANTUM {
            if cpu.halted && !cpu.interrupt_ready() {
                break;
            }
            cpu.step(xios)?;
            self.instructions_executed += 1;

            if !self.auto_started
                && !self.context.clock_enabled()
                && self.instructions_executed >= AUTO_START_INSTRUCTIONS
            {
                warn!("guest never called STARTCLOCK; auto-enabling clock");
                self.context.set_clock_enabled(true);
                self.auto_started = true;
            }
        }

        let elapsed = quantum_start.elapsed();
        if elapsed < QUANTUM {
            // A polled realization may choose to busy-wait or yield here;
            // a dedicated-thread realization sleeps. Either is acceptable
            // per design §9 as long as the quantum boundary is the only
            // CPU-role suspension point it introduces.
            std::thread::sleep(QUANTUM - elapsed);
        }
        Ok(())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        info!(
            instructions = self.instructions_executed,
            ticks = self.tick_count,
            "runner stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BankMemory;

    fn cpu_with(program: &[u8]) -> Cpu {
        let mut mem = BankMemory::with_defaults();
        mem.bulk_load(0, 0x0000, program);
        Cpu::new(mem)
    }

    #[test]
    fn stop_requested_halts_the_loop_promptly() {
        let context = Arc::new(Context::new(1));
        let mut runner = Runner::new(context.clone());
        let mut cpu = cpu_with(&[0x00, 0xC3, 0x00, 0x00]); // NOP; JP 0x0000 (spin forever)
        let mut xios = Xios::new(context.clone(), 1);
        context.request_stop();
        let reason = runner.run(&mut cpu, &mut xios, None).unwrap();
        assert_eq!(reason, StopReason::Requested);
    }

    #[test]
    fn wall_clock_timeout_is_observable() {
        let context = Arc::new(Context::new(1));
        let mut runner = Runner::new(context.clone());
        let mut cpu = cpu_with(&[0x00, 0xC3, 0x00, 0x00]);
        let mut xios = Xios::new(context.clone(), 1);
        let reason = runner.run(&mut cpu, &mut xios, Some(Duration::from_millis(5))).unwrap();
        assert_eq!(reason, StopReason::TimedOut);
        assert!(context.timed_out());
    }

    #[test]
    fn interrupt_acceptance_never_exceeds_the_rate_limit() {
        // Main loop: NOP; JP 0x0000 (spins forever).
        // Handler at 0x0038: EI; LD A,(0x5000); INC A; LD (0x5000),A; RET --
        // counts how many times an interrupt was actually accepted and
        // re-arms IFF1 each time, the way a real ISR would.
        let mut cpu = cpu_with(&[0x00, 0xC3, 0x00, 0x00]);
        cpu.memory.bulk_load(
            0,
            0x0038,
            &[0xFB, 0x3A, 0x00, 0x50, 0x3C, 0x32, 0x00, 0x50, 0xC9],
        );
        cpu.iff1 = true; // simulate already being past any EI delay window

        let context = Arc::new(Context::new(1));
        context.set_clock_enabled(true);
        let mut runner = Runner::new(context.clone());
        let mut xios = Xios::new(context.clone(), 1);

        const QUANTA: u64 = 20;
        for _ in 0..QUANTA {
            runner.run_quantum(&mut cpu, &mut xios).unwrap();
        }

        let accepted = cpu.memory.read(0x5000);
        let max_cycles = QUANTA * INSTRUCTIONS_PER_QUANTUM as u64 * crate::cpu::NOMINAL_CYCLES_PER_INSTRUCTION;
        let max_possible_interrupts = (max_cycles / MIN_CYCLES_BETWEEN_INTERRUPTS) as u8 + 1;
        assert!(accepted >= 1, "clock enabled + IFF1 set must accept at least one interrupt");
        assert!(
            accepted <= max_possible_interrupts,
            "accepted {accepted} interrupts but the rate limit permits at most {max_possible_interrupts} in {max_cycles} cycles"
        );
    }
}
