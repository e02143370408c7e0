//! Per-session catch-up buffers

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// Output received while a session was not active.
///
/// Bounded by `cap`; once full the oldest bytes are dropped, since the purpose
/// is letting the operator catch up rather than archiving.
#[derive(Debug)]
pub struct PendingOutput {
    buf: BytesMut,
    cap: usize,
    dropped: u64,
}

impl PendingOutput {
    /// Create an empty buffer retaining at most `cap` bytes
    pub fn new(cap: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            cap,
            dropped: 0,
        }
    }

    /// Append output, discarding the oldest bytes past the cap
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.cap {
            self.dropped += (self.buf.len() + data.len() - self.cap) as u64;
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.cap..]);
            return;
        }

        self.buf.extend_from_slice(data);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.advance(excess);
            self.dropped += excess as u64;
        }
    }

    /// Take the retained bytes and reset the drop counter
    pub fn take(&mut self) -> Bytes {
        self.dropped = 0;
        self.buf.split().freeze()
    }

    /// Bytes discarded since the last `take`
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes currently retained
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Lines the operator forwarded to a session, oldest first
#[derive(Debug)]
pub struct InputHistory {
    lines: VecDeque<Bytes>,
    max_len: usize,
}

impl InputHistory {
    /// Remember at most `max_len` lines
    pub fn new(max_len: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_len,
        }
    }

    /// Record a forwarded line
    pub fn record(&mut self, line: Bytes) {
        if self.max_len == 0 {
            return;
        }
        if self.lines.len() == self.max_len {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Snapshot of the recorded lines
    pub fn to_vec(&self) -> Vec<Bytes> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_keeps_everything_under_cap() {
        let mut pending = PendingOutput::new(16);
        pending.push(b"abc");
        pending.push(b"def");

        assert_eq!(pending.len(), 6);
        assert_eq!(pending.dropped(), 0);
        assert_eq!(&pending.take()[..], b"abcdef");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_drops_oldest_first() {
        let mut pending = PendingOutput::new(5);
        pending.push(b"abcd");
        pending.push(b"efg");

        assert_eq!(pending.dropped(), 2);
        assert_eq!(&pending.take()[..], b"cdefg");
        assert_eq!(pending.dropped(), 0);
    }

    #[test]
    fn test_pending_chunk_larger_than_cap() {
        let mut pending = PendingOutput::new(4);
        pending.push(b"xy");
        pending.push(b"0123456789");

        assert_eq!(pending.dropped(), 8);
        assert_eq!(&pending.take()[..], b"6789");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = InputHistory::new(2);
        history.record(Bytes::from_static(b"id\n"));
        history.record(Bytes::from_static(b"whoami\n"));
        history.record(Bytes::from_static(b"uname -a\n"));

        let lines = history.to_vec();
        assert_eq!(lines.len(), 2);
        assert_eq!(&lines[0][..], b"whoami\n");
        assert_eq!(&lines[1][..], b"uname -a\n");
    }

    #[test]
    fn test_history_disabled() {
        let mut history = InputHistory::new(0);
        history.record(Bytes::from_static(b"ls\n"));
        assert!(history.is_empty());
    }
}
