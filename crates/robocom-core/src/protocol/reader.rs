//! Incremental frame reader
//!
//! [`FrameReader::poll_frame`] is safe to call as often as the caller likes: it
//! never blocks, only consumes bytes that are already available, and leaves the
//! reader in a state from which the next call can carry on. Malformed frames
//! are dropped silently and the reader goes back to looking for a start marker.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::codec::FrameCodec;
use super::message::{ProtocolVersion, Request, Response};
use super::source::{ByteSource, Transport};
use super::task::TaskId;
use super::{ProtocolError, FRAME_END, FRAME_START, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Where the reader is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    /// Discarding bytes until a start marker shows up
    SeekingStart,
    /// Start marker consumed, waiting for the whole frame to be buffered
    AwaitingHeader,
    /// The whole frame plus its end marker is available
    FrameReady {
        /// Length byte of the buffered frame
        length: u8,
    },
}

/// A complete frame body, not yet interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Type byte including the high flag bit
    pub type_byte: u8,
    /// Task id from the header
    pub task_id: TaskId,
    /// Bytes between the header and the end marker
    pub payload: Vec<u8>,
}

/// Counters kept by the reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    /// Frames delivered to the caller
    pub frames: u64,
    /// Frames dropped for a bad length, bad end marker or undecodable body
    pub dropped: u64,
    /// Noise bytes skipped while looking for a start marker
    pub discarded_bytes: u64,
}

/// Three-state frame assembler
#[derive(Debug, Clone)]
pub struct FrameReader {
    state: ReaderState,
    stats: ReaderStats,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    /// Reader positioned before any frame
    pub fn new() -> Self {
        Self {
            state: ReaderState::SeekingStart,
            stats: ReaderStats::default(),
        }
    }

    /// Current position within a frame
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Frame and drop counters so far
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Forget any partially seen frame
    pub fn reset(&mut self) {
        self.state = ReaderState::SeekingStart;
    }

    /// Count a frame that was assembled but could not be used
    pub(crate) fn record_dropped(&mut self) {
        self.stats.frames = self.stats.frames.saturating_sub(1);
        self.stats.dropped += 1;
    }

    /// Try to assemble one frame from what `source` has available
    ///
    /// Returns `Ok(None)` when no frame was completed during this call, either
    /// because more bytes are needed or because a malformed frame was dropped.
    /// Errors come only from the source itself.
    pub fn poll_frame<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> std::io::Result<Option<RawFrame>> {
        if self.state == ReaderState::SeekingStart && !self.seek_start(source)? {
            return Ok(None);
        }

        if self.state == ReaderState::AwaitingHeader && !self.await_frame(source)? {
            return Ok(None);
        }

        match self.state {
            ReaderState::FrameReady { length } => self.read_frame(source, length),
            _ => Ok(None),
        }
    }

    fn seek_start<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> std::io::Result<bool> {
        while source.available()? > 0 {
            match source.read_byte()? {
                Some(FRAME_START) => {
                    self.state = ReaderState::AwaitingHeader;
                    return Ok(true);
                }
                Some(_) => self.stats.discarded_bytes += 1,
                None => break,
            }
        }
        Ok(false)
    }

    fn await_frame<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> std::io::Result<bool> {
        let available = source.available()?;
        if available == 0 {
            return Ok(false);
        }

        let length = match source.peek_byte()? {
            Some(length) => length,
            None => return Ok(false),
        };

        if !(HEADER_SIZE..=HEADER_SIZE + MAX_PAYLOAD_SIZE).contains(&(length as usize)) {
            debug!("Dropping frame with invalid length {}", length);
            self.stats.dropped += 1;
            self.state = ReaderState::SeekingStart;
            return Ok(false);
        }

        // The length byte counts itself but not the end marker
        if available <= length as usize {
            return Ok(false);
        }

        self.state = ReaderState::FrameReady { length };
        Ok(true)
    }

    fn read_frame<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        length: u8,
    ) -> std::io::Result<Option<RawFrame>> {
        self.state = ReaderState::SeekingStart;

        let mut body = vec![0u8; length as usize];
        source.read_bytes(&mut body)?;
        let end = source.read_byte()?;

        if end != Some(FRAME_END) {
            debug!(
                "Dropping frame {:02x?}: expected end marker, got {:02x?}",
                body, end
            );
            self.stats.dropped += 1;
            return Ok(None);
        }

        trace!("Frame received: {:02x?}", body);
        self.stats.frames += 1;
        Ok(Some(RawFrame {
            type_byte: body[1],
            task_id: u16::from_le_bytes([body[2], body[3]]),
            payload: body.split_off(HEADER_SIZE),
        }))
    }
}

/// Typed message I/O over a transport
///
/// Reads decode into [`Response`]s; frames whose body does not decode are
/// dropped like any other malformed frame.
pub struct MessageIo<T> {
    transport: T,
    reader: FrameReader,
    codec: FrameCodec,
    tx_bytes: u64,
    tx_frames: u64,
}

impl<T: Transport> MessageIo<T> {
    /// Wrap `transport`, speaking `version`
    pub fn new(transport: T, version: ProtocolVersion) -> Self {
        Self {
            transport,
            reader: FrameReader::new(),
            codec: FrameCodec::new(version),
            tx_bytes: 0,
            tx_frames: 0,
        }
    }

    /// Encode and send a request
    pub fn write(&mut self, request: &Request) -> Result<(), ProtocolError> {
        let bytes = self.codec.frame_request(request)?;
        trace!("Sending {:?}: {:02x?}", request, bytes);
        self.transport.write_bytes(&bytes)?;
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        self.tx_frames = self.tx_frames.saturating_add(1);
        Ok(())
    }

    /// Read one response if a complete one is available
    pub fn read(&mut self) -> Result<Option<Response>, ProtocolError> {
        let raw = match self.reader.poll_frame(&mut self.transport)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match self.codec.decode_response_frame(&raw) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                debug!("Dropping undecodable frame {:?}: {}", raw, e);
                self.reader.record_dropped();
                Ok(None)
            }
        }
    }

    /// Current state of the frame reader
    pub fn reader_state(&self) -> ReaderState {
        self.reader.state()
    }

    /// Frame and drop counters of the reader
    pub fn stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    /// (bytes written, frames written)
    pub fn tx_counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.tx_frames)
    }

    /// Codec used for both directions
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back
    pub fn into_inner(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::source::MemoryLink;
    use std::collections::VecDeque;

    fn echo_frame(task_id: u16) -> Vec<u8> {
        let [lo, hi] = task_id.to_le_bytes();
        vec![FRAME_START, 4, 0x81, lo, hi, FRAME_END]
    }

    #[test]
    fn test_single_frame() {
        let mut src: VecDeque<u8> = echo_frame(5).into_iter().collect();
        let mut reader = FrameReader::new();
        let frame = reader.poll_frame(&mut src).unwrap().unwrap();
        assert_eq!(frame.type_byte, 0x81);
        assert_eq!(frame.task_id, 5);
        assert!(frame.payload.is_empty());
        assert_eq!(reader.state(), ReaderState::SeekingStart);
        assert_eq!(reader.stats().frames, 1);
    }

    #[test]
    fn test_waits_for_end_marker() {
        let bytes = echo_frame(1);
        let mut src: VecDeque<u8> = bytes[..5].iter().copied().collect();
        let mut reader = FrameReader::new();
        assert!(reader.poll_frame(&mut src).unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::AwaitingHeader);
        // Nothing past the start marker was consumed
        assert_eq!(src.len(), 4);

        src.push_back(FRAME_END);
        assert!(reader.poll_frame(&mut src).unwrap().is_some());
    }

    #[test]
    fn test_bad_length_goes_back_to_seeking() {
        let mut src: VecDeque<u8> = vec![FRAME_START, 3, 0x81, 1, 0, FRAME_END]
            .into_iter()
            .collect();
        let mut reader = FrameReader::new();
        assert!(reader.poll_frame(&mut src).unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::SeekingStart);
        assert_eq!(reader.stats().dropped, 1);
        // The length byte itself is left for the next scan
        assert_eq!(src.front(), Some(&3));
    }

    #[test]
    fn test_empty_source_keeps_state() {
        let mut src: VecDeque<u8> = VecDeque::new();
        let mut reader = FrameReader::new();
        assert!(reader.poll_frame(&mut src).unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::SeekingStart);

        src.push_back(FRAME_START);
        assert!(reader.poll_frame(&mut src).unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::AwaitingHeader);
        assert!(reader.poll_frame(&mut src).unwrap().is_none());
        assert_eq!(reader.state(), ReaderState::AwaitingHeader);
    }

    #[test]
    fn test_noise_is_counted() {
        let mut src: VecDeque<u8> = [0x00, 0x11, 0x22].into_iter().chain(echo_frame(2)).collect();
        let mut reader = FrameReader::new();
        assert!(reader.poll_frame(&mut src).unwrap().is_some());
        assert_eq!(reader.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_message_io_drops_unknown_type() {
        let mut link = MemoryLink::new();
        link.feed(&[FRAME_START, 4, 0xFF, 1, 0, FRAME_END]);
        link.feed(&echo_frame(9));
        let mut io = MessageIo::new(link, ProtocolVersion::Robocom);

        assert!(io.read().unwrap().is_none());
        let response = io.read().unwrap().unwrap();
        assert_eq!(response.task_id, 9);

        let stats = io.stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_message_io_counts_writes() {
        let mut io = MessageIo::new(MemoryLink::new(), ProtocolVersion::Robocom);
        io.write(&Request::with_task_id(1, crate::protocol::RequestKind::Echo))
            .unwrap();
        assert_eq!(io.tx_counters(), (6, 1));
        assert_eq!(io.transport().written(), echo_frame(1).as_slice());
    }
}
