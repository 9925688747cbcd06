//! Byte-level transport abstraction
//!
//! The frame reader only ever talks to a [`ByteSource`]: it asks how many bytes
//! can be had without blocking, peeks at one, and reads exactly as many as were
//! reported available. Anything that can answer those questions (a serial
//! port, a test buffer, a tokio read buffer) can carry the protocol.

use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::io;

/// Non-blocking read side of a link
pub trait ByteSource {
    /// Number of bytes that can be read right now without blocking
    fn available(&mut self) -> io::Result<usize>;

    /// Look at the next byte without consuming it. A following
    /// [`read_byte`](Self::read_byte) returns the same byte.
    fn peek_byte(&mut self) -> io::Result<Option<u8>>;

    /// Consume the next byte, `None` if nothing is available
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Fill `buf` completely. Only call after [`available`](Self::available)
    /// reported at least `buf.len()` bytes.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Write side of a link
pub trait ByteSink {
    /// Send all bytes immediately
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// A full-duplex link
pub trait Transport: ByteSource + ByteSink {}

impl<T: ByteSource + ByteSink> Transport for T {}

fn short_read(wanted: usize, had: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {} bytes with only {} available", wanted, had),
    )
}

impl ByteSource for VecDeque<u8> {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.len())
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.front().copied())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.pop_front())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.len() < buf.len() {
            return Err(short_read(buf.len(), self.len()));
        }
        let n = buf.len();
        for (slot, b) in buf.iter_mut().zip(self.drain(..n)) {
            *slot = b;
        }
        Ok(())
    }
}

impl ByteSource for BytesMut {
    fn available(&mut self) -> io::Result<usize> {
        Ok(self.len())
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.first().copied())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.get_u8()))
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.len() < buf.len() {
            return Err(short_read(buf.len(), self.len()));
        }
        self.copy_to_slice(buf);
        Ok(())
    }
}

/// In-memory link: bytes fed by the test side come out of the read side,
/// bytes written by the protocol side are collected for inspection.
#[derive(Debug, Default)]
pub struct MemoryLink {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
}

impl MemoryLink {
    /// Link with nothing to read
    pub fn new() -> Self {
        Self::default()
    }

    /// Link that starts with `bytes` waiting to be read
    pub fn with_incoming(bytes: &[u8]) -> Self {
        let mut link = Self::new();
        link.feed(bytes);
        link
    }

    /// Make more bytes available to the reader
    pub fn feed(&mut self, bytes: &[u8]) {
        self.incoming.extend(bytes.iter().copied());
    }

    /// Take everything written so far
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Everything written so far, without taking it
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Bytes fed but not read yet
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }
}

impl ByteSource for MemoryLink {
    fn available(&mut self) -> io::Result<usize> {
        self.incoming.available()
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        self.incoming.peek_byte()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.incoming.read_byte()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.incoming.read_bytes(buf)
    }
}

impl ByteSink for MemoryLink {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.extend_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_does_not_consume() {
        let mut link = MemoryLink::with_incoming(&[0xAB, 0xCD]);
        assert_eq!(link.peek_byte().unwrap(), Some(0xAB));
        assert_eq!(link.peek_byte().unwrap(), Some(0xAB));
        assert_eq!(link.available().unwrap(), 2);
        assert_eq!(link.read_byte().unwrap(), Some(0xAB));
        assert_eq!(link.read_byte().unwrap(), Some(0xCD));
        assert_eq!(link.read_byte().unwrap(), None);
    }

    #[test]
    fn test_read_bytes_requires_availability() {
        let mut link = MemoryLink::with_incoming(&[1, 2, 3]);
        let mut buf = [0u8; 4];
        assert!(link.read_bytes(&mut buf).is_err());

        let mut buf = [0u8; 2];
        link.read_bytes(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert_eq!(link.pending(), 1);
    }

    #[test]
    fn test_deque_read_across_wrap() {
        let mut deque: VecDeque<u8> = VecDeque::with_capacity(4);
        deque.extend([1, 2, 3]);
        deque.pop_front();
        deque.pop_front();
        // Storage now wraps around the end of the ring buffer
        deque.extend([4, 5, 6]);
        deque.push_front(2);

        let mut out = [0u8; 4];
        deque.read_bytes(&mut out).unwrap();
        assert_eq!(out, [2, 3, 4, 5]);
        assert_eq!(deque.available().unwrap(), 1);
        assert_eq!(deque.read_byte().unwrap(), Some(6));
    }

    #[test]
    fn test_bytes_mut_source() {
        let mut buf = BytesMut::from(&[9u8, 8, 7][..]);
        assert_eq!(buf.peek_byte().unwrap(), Some(9));
        assert_eq!(buf.read_byte().unwrap(), Some(9));
        let mut out = [0u8; 2];
        buf.read_bytes(&mut out).unwrap();
        assert_eq!(out, [8, 7]);
        assert_eq!(buf.read_byte().unwrap(), None);
    }

    #[test]
    fn test_written_bytes_are_collected() {
        let mut link = MemoryLink::new();
        link.write_bytes(b"ab").unwrap();
        link.write_bytes(b"c").unwrap();
        assert_eq!(link.written(), b"abc");
        assert_eq!(link.take_written(), b"abc".to_vec());
        assert!(link.written().is_empty());
    }
}
