//! The host↔guest file bridge (component I): fixed 256-byte request/reply
//! mailboxes, drained exactly once by the guest's resident system process
//! and replied to exactly once per requesting host waiter.

use crate::error::BridgeError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub const MAILBOX_SIZE: usize = 256;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Open,
    Read,
    Write,
    Close,
    Stat,
    Directory,
    Remove,
}

#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub id: u32,
    pub kind: RequestType,
    pub drive: u8,
    pub user: u8,
    pub flags: u8,
    pub name: [u8; 11], // 8.3 filename, space-padded
    pub offset: u32,
    pub length: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BridgeReply {
    pub id: u32,
    pub status: u8,
    pub data: Vec<u8>,
}

struct Slot {
    pending_request: Option<BridgeRequest>,
    reply: Option<BridgeReply>,
}

/// One in-flight request at a time, per design §4.8. Host waiters block
/// on the condvar until a reply tagged with their request id arrives, or
/// the timeout elapses.
pub struct Bridge {
    next_id: AtomicU32,
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Default for Bridge {
    fn default() -> Self {
        Bridge {
            next_id: AtomicU32::new(1),
            slot: Mutex::new(Slot { pending_request: None, reply: None }),
            ready: Condvar::new(),
        }
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request and block for its matching reply.
    pub fn submit(&self, mut request: BridgeRequest, timeout: Duration) -> Result<BridgeReply, BridgeError> {
        request.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = request.id;
        let mut guard = self.slot.lock().unwrap();
        guard.pending_request = Some(request);
        self.ready.notify_all();

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(reply) = guard.reply.take() {
                if reply.id == id {
                    return Ok(reply);
                }
                // A stale reply for a previous request; put it back and
                // keep waiting (should not happen given the single
                // in-flight invariant, but never silently drop data).
                guard.reply = Some(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout);
            }
            let (g, timeout_result) = self
                .ready
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = g;
            if timeout_result.timed_out() && guard.reply.is_none() {
                return Err(BridgeError::Timeout);
            }
        }
    }

    /// Polled by XIOS on the guest's behalf: take the pending request, if
    /// any, for the resident RSP to service.
    pub fn take_request(&self) -> Option<BridgeRequest> {
        self.slot.lock().unwrap().pending_request.take()
    }

    /// Deliver the guest's reply and wake any waiter.
    pub fn deliver_reply(&self, reply: BridgeReply) {
        let mut guard = self.slot.lock().unwrap();
        guard.reply = Some(reply);
        self.ready.notify_all();
    }
}

pub fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

impl RequestType {
    fn to_wire(self) -> u8 {
        match self {
            RequestType::Open => 0,
            RequestType::Read => 1,
            RequestType::Write => 2,
            RequestType::Close => 3,
            RequestType::Stat => 4,
            RequestType::Directory => 5,
            RequestType::Remove => 6,
        }
    }

    fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(RequestType::Open),
            1 => Some(RequestType::Read),
            2 => Some(RequestType::Write),
            3 => Some(RequestType::Close),
            4 => Some(RequestType::Stat),
            5 => Some(RequestType::Directory),
            6 => Some(RequestType::Remove),
            _ => None,
        }
    }
}

impl BridgeRequest {
    /// Serialize into a 256-byte mailbox body (the request id is a
    /// host-side correlation detail and is not carried over the wire —
    /// the bridge allows only one in-flight request, so the guest never
    /// needs to echo it back).
    pub fn to_wire(&self) -> [u8; MAILBOX_SIZE] {
        let mut buf = [0u8; MAILBOX_SIZE];
        buf[0] = self.kind.to_wire();
        buf[1] = self.drive;
        buf[2] = self.user;
        buf[3] = self.flags;
        buf[4..15].copy_from_slice(&self.name);
        buf[15..19].copy_from_slice(&self.offset.to_le_bytes());
        buf[19..21].copy_from_slice(&self.length.to_le_bytes());
        let tail = &self.data[..self.data.len().min(MAILBOX_SIZE - 21)];
        buf[21..21 + tail.len()].copy_from_slice(tail);
        buf
    }

    pub fn from_wire(id: u32, buf: &[u8]) -> Option<Self> {
        if buf.len() < 21 {
            return None;
        }
        let kind = RequestType::from_wire(buf[0])?;
        let mut name = [0u8; 11];
        name.copy_from_slice(&buf[4..15]);
        Some(BridgeRequest {
            id,
            kind,
            drive: buf[1],
            user: buf[2],
            flags: buf[3],
            name,
            offset: u32::from_le_bytes([buf[15], buf[16], buf[17], buf[18]]),
            length: u16::from_le_bytes([buf[19], buf[20]]),
            data: buf[21..].to_vec(),
        })
    }
}

impl BridgeReply {
    pub fn to_wire(&self) -> [u8; MAILBOX_SIZE] {
        let mut buf = [0u8; MAILBOX_SIZE];
        buf[0] = self.status;
        let len = (self.data.len() as u16).min((MAILBOX_SIZE - 3) as u16);
        buf[1..3].copy_from_slice(&len.to_le_bytes());
        let tail = &self.data[..len as usize];
        buf[3..3 + tail.len()].copy_from_slice(tail);
        buf
    }

    pub fn from_wire(id: u32, buf: &[u8]) -> Option<Self> {
        if buf.len() < 3 {
            return None;
        }
        let status = buf[0];
        let len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let len = len.min(buf.len() - 3);
        Some(BridgeReply { id, status, data: buf[3..3 + len].to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sample_request() -> BridgeRequest {
        BridgeRequest {
            id: 0,
            kind: RequestType::Read,
            drive: 0,
            user: 0,
            flags: 0,
            name: *b"FOO     TXT",
            offset: 0,
            length: 128,
            data: Vec::new(),
        }
    }

    #[test]
    fn reply_is_matched_to_its_request_id() {
        let bridge = Arc::new(Bridge::new());
        let guest = bridge.clone();
        let handle = thread::spawn(move || loop {
            if let Some(req) = guest.take_request() {
                guest.deliver_reply(BridgeReply { id: req.id, status: 0, data: vec![1, 2, 3] });
                break;
            }
            thread::yield_now();
        });
        let reply = bridge.submit(sample_request(), Duration::from_secs(1)).unwrap();
        handle.join().unwrap();
        assert_eq!(reply.data, vec![1, 2, 3]);
    }

    #[test]
    fn submit_times_out_when_nothing_answers() {
        let bridge = Bridge::new();
        let result = bridge.submit(sample_request(), Duration::from_millis(20));
        assert_eq!(result.unwrap_err(), BridgeError::Timeout);
    }

    #[test]
    fn request_wire_round_trips() {
        let mut req = sample_request();
        req.data = vec![9, 9, 9];
        let wire = req.to_wire();
        let back = BridgeRequest::from_wire(42, &wire[..25]).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back.kind, RequestType::Read);
        assert_eq!(back.name, req.name);
        assert_eq!(back.length, 128);
    }

    #[test]
    fn reply_wire_round_trips() {
        let reply = BridgeReply { id: 7, status: 0, data: vec![1, 2, 3, 4] };
        let wire = reply.to_wire();
        let back = BridgeReply::from_wire(7, &wire).unwrap();
        assert_eq!(back.status, 0);
        assert_eq!(back.data, vec![1, 2, 3, 4]);
    }
}
