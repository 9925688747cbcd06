//! Frame encoding/decoding
//!
//! Frame body layout (everything between the start and end markers):
//! - 1 byte: length = 4 + payload size, 4..=20
//! - 1 byte: 7-bit message type, high bit = request (send) / immediate (receive)
//! - 2 bytes: task id (little-endian)
//! - 0-16 bytes: payload
//!
//! Delayed responses (high bit clear) prefix their payload with a 4-byte
//! little-endian millis value; type-specific fields follow it.

use byteorder::{ByteOrder, LittleEndian};

use super::message::{
    Angle, Direction, EncoderReading, EncoderSubscription, FlushStats, GyroReading,
    GyroSubscription, MotorDrive, ProtocolVersion, Request, RequestKind, RequestType, Response,
    ResponseKind, ResponseType, Timing, WheelDrive,
};
use super::reader::RawFrame;
use super::task::TaskId;
use super::{
    ProtocolError, FRAME_END, FRAME_START, HEADER_SIZE, MAX_PAYLOAD_SIZE, MILLIS_PREFIX_SIZE,
    REQUEST_FLAG, TYPE_MASK,
};

/// Wrap a frame body in start/end markers for transmission
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(body.len() + 2);
    bytes.push(FRAME_START);
    bytes.extend_from_slice(body);
    bytes.push(FRAME_END);
    bytes
}

/// Builder for fixed-layout payloads
pub struct PayloadBuilder {
    payload: Vec<u8>,
}

impl PayloadBuilder {
    /// Empty payload
    pub fn new() -> Self {
        Self {
            payload: Vec::with_capacity(MAX_PAYLOAD_SIZE),
        }
    }

    /// Append one byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Append a boolean as 0 or 1
    pub fn flag(self, value: bool) -> Self {
        self.byte(u8::from(value))
    }

    /// Append a little-endian u16
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Append a little-endian i16
    pub fn i16_le(mut self, value: i16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_i16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Append a little-endian u32
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Finished payload bytes
    pub fn build(self) -> Vec<u8> {
        self.payload
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential reader over a fixed-layout payload
///
/// [`FieldReader::new`] checks the minimum length of the layout up front; every
/// accessor still fails with [`ProtocolError::PayloadTooShort`] rather than
/// reading past the end.
pub struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    /// Reader over `data`, which must hold at least `required` bytes
    pub fn new(data: &'a [u8], required: usize) -> Result<Self, ProtocolError> {
        if data.len() < required {
            return Err(ProtocolError::PayloadTooShort {
                expected: required,
                actual: data.len(),
            });
        }
        Ok(Self { data, offset: 0 })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.offset + n;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(ProtocolError::PayloadTooShort {
                expected: end,
                actual: self.data.len(),
            })?;
        self.offset = end;
        Ok(bytes)
    }

    /// Next byte
    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Next byte as a boolean, any non-zero value is true
    pub fn flag(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    /// Next two bytes as a little-endian `u16`
    pub fn u16_le(&mut self) -> Result<u16, ProtocolError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    /// Next two bytes as a little-endian `i16`
    pub fn i16_le(&mut self) -> Result<i16, ProtocolError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    /// Next four bytes as a little-endian `u32`
    pub fn u32_le(&mut self) -> Result<u32, ProtocolError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Bytes not consumed yet
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

/// Encodes and decodes message bodies for one protocol version
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    version: ProtocolVersion,
}

impl FrameCodec {
    /// Codec for `version`
    pub fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }

    /// Protocol version this codec speaks
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Encode a request body (without markers). The request flag is always set.
    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, ProtocolError> {
        let request_type = request.kind.request_type();
        let id = self
            .version
            .request_type_id(request_type)
            .ok_or(ProtocolError::UnsupportedMessage {
                message: request_type_name(request_type),
                version: self.version,
            })?;

        let payload = match &request.kind {
            RequestKind::Noop | RequestKind::Echo | RequestKind::Reset | RequestKind::Flush => {
                Vec::new()
            }
            RequestKind::SetWheelDrive(drive) => wheel_drive_payload(PayloadBuilder::new(), drive),
            RequestKind::SetServoAngle { servo_id, angle } => {
                PayloadBuilder::new().byte(*servo_id).byte(*angle).build()
            }
            RequestKind::EncoderReading(sub) => PayloadBuilder::new()
                .byte(sub.encoder_id)
                .flag(sub.subscribe)
                .build(),
            RequestKind::GyroReading(sub) => PayloadBuilder::new()
                .flag(sub.subscribe)
                .u32_le(sub.min_delay_millis)
                .build(),
        };

        body(id | REQUEST_FLAG, request.task_id, &payload)
    }

    /// Encode a response body (without markers), the way the controller does
    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, ProtocolError> {
        let response_type = response.kind.response_type();
        let id = self
            .version
            .response_type_id(response_type)
            .ok_or(ProtocolError::UnsupportedMessage {
                message: response_type_name(response_type),
                version: self.version,
            })?;

        let (type_byte, builder) = match response.timing {
            Timing::Immediate => (id | REQUEST_FLAG, PayloadBuilder::new()),
            Timing::Delayed { millis } => (id, PayloadBuilder::new().u32_le(millis)),
        };

        let payload = match &response.kind {
            ResponseKind::Echo => builder.build(),
            ResponseKind::Flush(stats) => builder
                .byte(stats.min_free_slots)
                .byte(stats.free_slots)
                .byte(stats.input_queue_max_size)
                .byte(stats.input_queue_size)
                .byte(stats.output_queue_max_size)
                .byte(stats.output_queue_size)
                .build(),
            ResponseKind::WheelDriveChanged(drive) => wheel_drive_payload(builder, drive),
            ResponseKind::EncoderReading(reading) => builder
                .byte(reading.encoder_id)
                .u32_le(reading.tick_index)
                .u32_le(reading.micros)
                .build(),
            ResponseKind::GyroReading(reading) => builder
                .i16_le(reading.yaw.centidegrees())
                .i16_le(reading.pitch.centidegrees())
                .i16_le(reading.roll.centidegrees())
                .u32_le(reading.micros)
                .build(),
        };

        body(type_byte, response.task_id, &payload)
    }

    /// Decode a response from its type byte, task id and payload
    pub fn decode_response(
        &self,
        type_byte: u8,
        task_id: TaskId,
        payload: &[u8],
    ) -> Result<Response, ProtocolError> {
        let id = type_byte & TYPE_MASK;
        let response_type = self
            .version
            .response_type(id)
            .ok_or(ProtocolError::UnknownMessageType(id))?;

        let (timing, fields) = if type_byte & REQUEST_FLAG != 0 {
            (Timing::Immediate, payload)
        } else {
            let mut prefix = FieldReader::new(payload, MILLIS_PREFIX_SIZE)?;
            let millis = prefix.u32_le()?;
            (Timing::Delayed { millis }, prefix.rest())
        };

        let kind = match response_type {
            ResponseType::Echo => ResponseKind::Echo,
            ResponseType::Flush => {
                let mut r = FieldReader::new(fields, 6)?;
                ResponseKind::Flush(FlushStats {
                    min_free_slots: r.u8()?,
                    free_slots: r.u8()?,
                    input_queue_max_size: r.u8()?,
                    input_queue_size: r.u8()?,
                    output_queue_max_size: r.u8()?,
                    output_queue_size: r.u8()?,
                })
            }
            ResponseType::WheelDriveChanged => {
                ResponseKind::WheelDriveChanged(read_wheel_drive(fields)?)
            }
            ResponseType::EncoderReading => {
                let mut r = FieldReader::new(fields, 9)?;
                ResponseKind::EncoderReading(EncoderReading {
                    encoder_id: r.u8()?,
                    tick_index: r.u32_le()?,
                    micros: r.u32_le()?,
                })
            }
            ResponseType::GyroReading => {
                let mut r = FieldReader::new(fields, 10)?;
                ResponseKind::GyroReading(GyroReading {
                    yaw: Angle(r.i16_le()?),
                    pitch: Angle(r.i16_le()?),
                    roll: Angle(r.i16_le()?),
                    micros: r.u32_le()?,
                })
            }
        };

        Ok(Response::new(task_id, timing, kind))
    }

    /// Decode a request from its type byte, task id and payload
    pub fn decode_request(
        &self,
        type_byte: u8,
        task_id: TaskId,
        payload: &[u8],
    ) -> Result<Request, ProtocolError> {
        let id = type_byte & TYPE_MASK;
        let request_type = self
            .version
            .request_type(id)
            .ok_or(ProtocolError::UnknownMessageType(id))?;

        let kind = match request_type {
            RequestType::Noop => RequestKind::Noop,
            RequestType::Echo => RequestKind::Echo,
            RequestType::Reset => RequestKind::Reset,
            RequestType::Flush => RequestKind::Flush,
            RequestType::SetWheelDrive => RequestKind::SetWheelDrive(read_wheel_drive(payload)?),
            RequestType::SetServoAngle => {
                let mut r = FieldReader::new(payload, 2)?;
                RequestKind::SetServoAngle {
                    servo_id: r.u8()?,
                    angle: r.u8()?,
                }
            }
            RequestType::EncoderReading => {
                let mut r = FieldReader::new(payload, 2)?;
                RequestKind::EncoderReading(EncoderSubscription {
                    encoder_id: r.u8()?,
                    subscribe: r.flag()?,
                })
            }
            RequestType::GyroReading => {
                let mut r = FieldReader::new(payload, 5)?;
                RequestKind::GyroReading(GyroSubscription {
                    subscribe: r.flag()?,
                    min_delay_millis: r.u32_le()?,
                })
            }
        };

        Ok(Request::with_task_id(task_id, kind))
    }

    /// Decode a response from an assembled frame
    pub fn decode_response_frame(&self, raw: &RawFrame) -> Result<Response, ProtocolError> {
        self.decode_response(raw.type_byte, raw.task_id, &raw.payload)
    }

    /// Decode a request from an assembled frame
    pub fn decode_request_frame(&self, raw: &RawFrame) -> Result<Request, ProtocolError> {
        self.decode_request(raw.type_byte, raw.task_id, &raw.payload)
    }

    /// Encode a request and wrap it in markers, ready to write
    pub fn frame_request(&self, request: &Request) -> Result<Vec<u8>, ProtocolError> {
        Ok(frame(&self.encode_request(request)?))
    }

    /// Encode a response and wrap it in markers, ready to write
    pub fn frame_response(&self, response: &Response) -> Result<Vec<u8>, ProtocolError> {
        Ok(frame(&self.encode_response(response)?))
    }
}

fn body(type_byte: u8, task_id: TaskId, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.push((HEADER_SIZE + payload.len()) as u8);
    bytes.push(type_byte);
    let mut id = [0u8; 2];
    LittleEndian::write_u16(&mut id, task_id);
    bytes.extend_from_slice(&id);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

fn wheel_drive_payload(builder: PayloadBuilder, drive: &WheelDrive) -> Vec<u8> {
    builder
        .byte(drive.motor1.direction.to_byte())
        .byte(drive.motor1.magnitude)
        .byte(drive.motor2.direction.to_byte())
        .byte(drive.motor2.magnitude)
        .build()
}

fn read_wheel_drive(fields: &[u8]) -> Result<WheelDrive, ProtocolError> {
    let mut r = FieldReader::new(fields, 4)?;
    let motor1 = MotorDrive::new(Direction::from_byte(r.u8()?), r.u8()?);
    let motor2 = MotorDrive::new(Direction::from_byte(r.u8()?), r.u8()?);
    Ok(WheelDrive::new(motor1, motor2))
}

fn request_type_name(t: RequestType) -> &'static str {
    match t {
        RequestType::Noop => "NoopRequest",
        RequestType::Echo => "EchoRequest",
        RequestType::Reset => "ResetRequest",
        RequestType::Flush => "FlushRequest",
        RequestType::SetWheelDrive => "SetWheelDriveRequest",
        RequestType::EncoderReading => "EncoderReadingRequest",
        RequestType::GyroReading => "GyroReadingRequest",
        RequestType::SetServoAngle => "SetServoAngleRequest",
    }
}

fn response_type_name(t: ResponseType) -> &'static str {
    match t {
        ResponseType::Echo => "EchoResponse",
        ResponseType::Flush => "FlushResponse",
        ResponseType::WheelDriveChanged => "WheelDriveChangedNotice",
        ResponseType::EncoderReading => "EncoderReadingNotice",
        ResponseType::GyroReading => "GyroReadingNotice",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_echo_request_bytes() {
        let codec = FrameCodec::default();
        let req = Request::with_task_id(1, RequestKind::Echo);
        let bytes = codec.frame_request(&req).unwrap();
        assert_eq!(bytes, vec![FRAME_START, 0x04, 0x81, 0x01, 0x00, FRAME_END]);
    }

    #[test]
    fn test_immediate_echo_response() {
        let codec = FrameCodec::default();
        let resp = codec.decode_response(0x01 | REQUEST_FLAG, 1, &[]).unwrap();
        assert_eq!(resp.task_id, 1);
        assert!(resp.is_immediate());
        assert_eq!(resp.millis_since_request(), None);
        assert_eq!(resp.kind, ResponseKind::Echo);
    }

    #[test]
    fn test_wheel_drive_request_layout() {
        let codec = FrameCodec::default();
        let req = Request::with_task_id(
            0x0102,
            RequestKind::SetWheelDrive(WheelDrive::new(
                MotorDrive::new(Direction::Forward, 100),
                MotorDrive::new(Direction::Reverse, 200),
            )),
        );
        assert_eq!(
            codec.encode_request(&req).unwrap(),
            vec![8, 0x84, 0x02, 0x01, 0, 100, 1, 200]
        );
    }

    #[test]
    fn test_gyro_request_layout() {
        let codec = FrameCodec::default();
        let req = Request::with_task_id(
            7,
            RequestKind::GyroReading(GyroSubscription {
                subscribe: true,
                min_delay_millis: 1000,
            }),
        );
        assert_eq!(
            codec.encode_request(&req).unwrap(),
            vec![9, 0x86, 7, 0, 1, 0xE8, 0x03, 0, 0]
        );
    }

    #[test]
    fn test_delayed_response_reads_millis_prefix() {
        let codec = FrameCodec::default();
        // millis = 0x00000200, then encoder 1, tick 5, micros 0x01020304
        let payload = [0x00, 0x02, 0x00, 0x00, 1, 5, 0, 0, 0, 0x04, 0x03, 0x02, 0x01];
        let resp = codec.decode_response(5, 9, &payload).unwrap();
        assert_eq!(resp.millis_since_request(), Some(0x200));
        assert_eq!(
            resp.kind,
            ResponseKind::EncoderReading(EncoderReading {
                encoder_id: 1,
                tick_index: 5,
                micros: 0x01020304,
            })
        );
    }

    #[test]
    fn test_negative_angles() {
        let codec = FrameCodec::default();
        // yaw = -1.5 (0xFF6A), pitch = 90.0 (9000), roll = -180.0
        let payload = PayloadBuilder::new()
            .u16_le(0xFF6A)
            .i16_le(9000)
            .i16_le(-18000)
            .u32_le(42)
            .build();
        let resp = codec.decode_response(6 | REQUEST_FLAG, 2, &payload).unwrap();
        match resp.kind {
            ResponseKind::GyroReading(g) => {
                assert_eq!(g.yaw.degrees(), -1.5);
                assert_eq!(g.pitch.degrees(), 90.0);
                assert_eq!(g.roll.degrees(), -180.0);
                assert_eq!(g.micros, 42);
            }
            other => panic!("Expected gyro reading, got {:?}", other),
        }
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let codec = FrameCodec::default();
        let err = codec
            .decode_response(3 | REQUEST_FLAG, 1, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::PayloadTooShort {
                expected: 6,
                actual: 3
            }
        ));

        // Delayed responses need at least the millis prefix
        assert!(codec.decode_response(1, 1, &[0, 0]).is_err());
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let codec = FrameCodec::default();
        let err = codec.decode_response(0x7F, 1, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageType(0x7F)));
        // Noop has no response form
        assert!(codec.decode_response(0x80, 1, &[]).is_err());
    }

    #[test]
    fn test_unsupported_request_for_version() {
        let codec = FrameCodec::new(ProtocolVersion::Remocon);
        let servo = RequestKind::SetServoAngle {
            servo_id: 0,
            angle: 90,
        };
        let req = Request::with_task_id(1, servo);
        assert!(matches!(
            codec.encode_request(&req),
            Err(ProtocolError::UnsupportedMessage { .. })
        ));
    }

    #[test]
    fn test_remocon_encoder_ids() {
        let codec = FrameCodec::new(ProtocolVersion::Remocon);
        let req = Request::with_task_id(
            1,
            RequestKind::EncoderReading(EncoderSubscription {
                encoder_id: 0,
                subscribe: true,
            }),
        );
        assert_eq!(codec.encode_request(&req).unwrap()[1], 6 | REQUEST_FLAG);
    }

    #[test]
    fn test_field_reader_rest() {
        let data = [1, 2, 3, 4, 5];
        let mut r = FieldReader::new(&data, 2).unwrap();
        assert_eq!(r.u16_le().unwrap(), 0x0201);
        assert_eq!(r.rest(), &[3, 4, 5]);
    }

    #[test]
    fn test_field_reader_stops_at_end() {
        let data = [0xFF, 1, 2];
        let mut r = FieldReader::new(&data, 1).unwrap();
        assert!(r.flag().unwrap());
        assert!(matches!(
            r.u32_le(),
            Err(ProtocolError::PayloadTooShort {
                expected: 5,
                actual: 3
            })
        ));
        // A failed read consumes nothing
        assert_eq!(r.i16_le().unwrap(), 0x0201);
        assert!(r.u8().is_err());
    }
}
