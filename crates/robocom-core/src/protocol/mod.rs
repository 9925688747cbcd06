//! Serial Protocol Communication
//!
//! Implements the Robocom framing protocol spoken by the robot controller.
//!
//! Every frame on the wire is `'>' | length | type+flag | task id (LE) | payload | '<'`.
//! There is no checksum; the start/end markers and the length bounds are the only
//! integrity checks, so the reader resynchronises on the next start marker whenever
//! a frame does not add up.

pub mod codec;
mod error;
pub mod framed;
pub mod message;
pub mod reader;
pub mod serial;
pub mod source;
pub mod task;

pub use codec::{frame, FieldReader, FrameCodec, PayloadBuilder};
pub use error::ProtocolError;
pub use framed::{connect_framed, open_framed, settle, RobocomCodec, SerialFramed};
pub use message::{
    Angle, Direction, EncoderReading, EncoderSubscription, FlushStats, GyroReading,
    GyroSubscription, MotorDrive, ProtocolVersion, Request, RequestKind, RequestType, Response,
    ResponseKind, ResponseType, Timing, WheelDrive,
};
pub use reader::{FrameReader, MessageIo, RawFrame, ReaderState, ReaderStats};
pub use serial::{list_ports, open_port, PortInfo, SerialTransport};
pub use source::{ByteSink, ByteSource, MemoryLink, Transport};
pub use task::{TaskId, TaskIdSource};

/// Default baud rate of the robot controller
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Default timeout for flush/echo round trips in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Byte that opens every frame (`'>'`)
pub const FRAME_START: u8 = b'>';

/// Byte that closes every frame (`'<'`)
pub const FRAME_END: u8 = b'<';

/// Size of the fixed header: length, type+flag and the two task id bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum payload carried by one frame
pub const MAX_PAYLOAD_SIZE: usize = 16;

/// Size of the millis prefix carried by delayed responses
pub const MILLIS_PREFIX_SIZE: usize = 4;

/// High bit of the type byte. Marks a request when sending and an immediate
/// response when receiving.
pub const REQUEST_FLAG: u8 = 0x80;

/// Mask selecting the 7-bit message type from the type byte
pub const TYPE_MASK: u8 = 0x7F;
