//! Async framing
//!
//! Adapts the frame reader to `tokio_util::codec` so the protocol can run over
//! any `AsyncRead + AsyncWrite`, including a `tokio_serial::SerialStream`.

use bytes::{BufMut, BytesMut};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info};

use super::codec::FrameCodec;
use super::message::{ProtocolVersion, Request, Response};
use super::reader::{FrameReader, ReaderStats};
use super::ProtocolError;
use crate::config::LinkConfig;

/// Decodes [`Response`]s and encodes [`Request`]s
#[derive(Debug, Clone, Default)]
pub struct RobocomCodec {
    reader: FrameReader,
    codec: FrameCodec,
}

impl RobocomCodec {
    /// Codec for `version`
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            reader: FrameReader::new(),
            codec: FrameCodec::new(version),
        }
    }

    /// Frame and drop counters of the decoder
    pub fn stats(&self) -> ReaderStats {
        self.reader.stats()
    }
}

impl Decoder for RobocomCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
        // Unlike the polling API, returning None here means "need more bytes",
        // so keep going while dropped frames still leave data to look at.
        loop {
            let before = (src.len(), self.reader.state());
            if let Some(raw) = self.reader.poll_frame(src)? {
                match self.codec.decode_response_frame(&raw) {
                    Ok(response) => return Ok(Some(response)),
                    Err(e) => {
                        debug!("Dropping undecodable frame {:?}: {}", raw, e);
                        self.reader.record_dropped();
                        continue;
                    }
                }
            }
            if (src.len(), self.reader.state()) == before {
                return Ok(None);
            }
        }
    }
}

impl Encoder<Request> for RobocomCodec {
    type Error = ProtocolError;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let bytes = self.codec.frame_request(&request)?;
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

/// Async serial stream carrying Robocom frames
pub type SerialFramed = Framed<SerialStream, RobocomCodec>;

/// Open the configured port as an async framed stream
///
/// Must be called from within a tokio runtime. Unlike
/// [`SerialTransport::open`](super::SerialTransport::open) this does not wait
/// for the board to settle; use [`connect_framed`] for that.
pub fn open_framed(config: &LinkConfig) -> Result<SerialFramed, ProtocolError> {
    let stream = tokio_serial::new(&config.port_name, config.baud_rate)
        .open_native_async()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    Ok(Framed::new(stream, RobocomCodec::new(config.protocol)))
}

/// Sleep for the configured settle delay without blocking the runtime
pub async fn settle(config: &LinkConfig) {
    let delay = config.settle_delay();
    if !delay.is_zero() {
        info!("Waiting {}ms for the board to reset", delay.as_millis());
        tokio::time::sleep(delay).await;
    }
}

/// Open the configured port, wait for the board to settle and drop whatever
/// its bootloader printed meanwhile
pub async fn connect_framed(config: &LinkConfig) -> Result<SerialFramed, ProtocolError> {
    let mut framed = open_framed(config)?;
    settle(config).await;
    framed
        .get_ref()
        .clear(ClearBuffer::Input)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    framed.read_buffer_mut().clear();
    Ok(framed)
}
