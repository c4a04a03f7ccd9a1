//! Per-virtual-console byte queues (component D). Each console has a small
//! bounded host→guest input ring and a larger guest→host output ring;
//! both are lock-free single-producer/single-consumer and never block —
//! a full queue drops the incoming byte and reports it to the caller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const INPUT_CAPACITY: usize = 256;
const OUTPUT_CAPACITY: usize = 4096;

/// A fixed-capacity SPSC ring. `head` is advanced by the consumer, `tail`
/// by the producer; both wrap modulo `capacity + 1` slots so a full ring
/// is distinguishable from an empty one without a separate counter.
struct Ring {
    buf: Vec<AtomicByte>,
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

type AtomicByte = std::sync::atomic::AtomicU8;

impl Ring {
    fn new(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity + 1);
        for _ in 0..=capacity {
            buf.push(AtomicByte::new(0));
        }
        Ring { buf, capacity, head: AtomicUsize::new(0), tail: AtomicUsize::new(0) }
    }

    fn slots(&self) -> usize {
        self.capacity + 1
    }

    fn try_push(&self, byte: u8) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        let next = (tail + 1) % self.slots();
        if next == self.head.load(Ordering::Acquire) {
            return false; // full
        }
        self.buf[tail].store(byte, Ordering::Relaxed);
        self.tail.store(next, Ordering::Release);
        true
    }

    fn try_pop(&self) -> Option<u8> {
        let head = self.head.load(Ordering::Acquire);
        if head == self.tail.load(Ordering::Acquire) {
            return None; // empty
        }
        let byte = self.buf[head].load(Ordering::Relaxed);
        self.head.store((head + 1) % self.slots(), Ordering::Release);
        Some(byte)
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.slots() - head + tail
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn has_space(&self) -> bool {
        self.len() < self.capacity
    }
}

pub struct Console {
    input: Ring,
    output: Ring,
    pub connected: AtomicBool,
    pub local_echo: AtomicBool,
}

impl Default for Console {
    fn default() -> Self {
        Console {
            input: Ring::new(INPUT_CAPACITY),
            output: Ring::new(OUTPUT_CAPACITY),
            connected: AtomicBool::new(false),
            local_echo: AtomicBool::new(false),
        }
    }
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by a host session pushing a keystroke toward the guest.
    /// Returns `false` if the input ring was full (byte dropped).
    pub fn push_input(&self, byte: u8) -> bool {
        self.input.try_push(byte)
    }

    /// Called by XIOS `CONIN`/`CONST` on behalf of the guest.
    pub fn pop_input(&self) -> Option<u8> {
        self.input.try_pop()
    }

    pub fn input_ready(&self) -> bool {
        !self.input.is_empty()
    }

    /// Called by XIOS `CONOUT` on behalf of the guest. Returns `false` if
    /// the output ring was full (byte dropped).
    pub fn push_output(&self, byte: u8) -> bool {
        self.output.try_push(byte)
    }

    /// Called by a host session draining bytes toward the client.
    pub fn pop_output(&self) -> Option<u8> {
        self.output.try_pop()
    }

    pub fn output_has_space(&self) -> bool {
        self.output.has_space()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, v: bool) {
        self.connected.store(v, Ordering::Release);
    }
}

pub struct ConsoleTable {
    consoles: Vec<Console>,
}

impl ConsoleTable {
    pub fn new(count: usize) -> Self {
        ConsoleTable { consoles: (0..count).map(|_| Console::new()).collect() }
    }

    pub fn count(&self) -> usize {
        self.consoles.len()
    }

    pub fn get(&self, index: usize) -> Option<&Console> {
        self.consoles.get(index)
    }

    /// First console with no attached session, for assigning an incoming
    /// SSH connection.
    pub fn first_free(&self) -> Option<usize> {
        self.consoles.iter().position(|c| !c.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_reads_are_a_fifo_prefix_of_what_was_pushed() {
        let console = Console::new();
        let sent = b"status\r";
        for &b in sent {
            assert!(console.push_input(b));
        }
        let mut received = Vec::new();
        while let Some(b) = console.pop_input() {
            received.push(b);
        }
        assert_eq!(&received, sent);
    }

    #[test]
    fn input_ring_reports_drop_when_full() {
        let console = Console::new();
        for _ in 0..INPUT_CAPACITY {
            assert!(console.push_input(0x41));
        }
        assert!(!console.push_input(0x42), "ring at capacity must report drop");
    }

    #[test]
    fn output_has_space_reflects_occupancy() {
        let console = Console::new();
        assert!(console.output_has_space());
        for _ in 0..OUTPUT_CAPACITY {
            console.push_output(0);
        }
        assert!(!console.output_has_space());
    }

    #[test]
    fn first_free_skips_connected_consoles() {
        let table = ConsoleTable::new(4);
        table.get(0).unwrap().set_connected(true);
        table.get(1).unwrap().set_connected(true);
        assert_eq!(table.first_free(), Some(2));
    }
}
