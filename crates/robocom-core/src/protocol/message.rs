//! Messages and the type registry
//!
//! Requests travel from the host to the robot, responses and notices travel back.
//! Both directions share the frame envelope but not the type tables: the two
//! protocol generations number their messages differently, so every mapping
//! between a wire id and a message type goes through [`ProtocolVersion`].

use serde::{Deserialize, Serialize};

use super::task::{TaskId, TaskIdSource};

/// Protocol generation spoken by the controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Robot firmware with servo and gyro support. Requests and their
    /// responses share one id per kind.
    #[default]
    Robocom,
    /// Original remote-control firmware: no servo, no gyro, and separate ids
    /// for the wheel drive request/notice and encoder request/notice.
    Remocon,
}

/// Request types known to at least one protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Does nothing; useful to check the link
    Noop,
    /// Answered immediately with an echo response
    Echo,
    /// Stops the wheels and clears subscriptions
    Reset,
    /// Barrier: answered after everything queued before it
    Flush,
    /// Sets both motor drives
    SetWheelDrive,
    /// Subscribes to or unsubscribes from an encoder
    EncoderReading,
    /// Subscribes to or unsubscribes from the gyro
    GyroReading,
    /// Moves a servo
    SetServoAngle,
}

/// Response and notice types known to at least one protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    /// Answer to an echo request
    Echo,
    /// Answer to a flush, with queue statistics
    Flush,
    /// Notice that the wheel drive changed
    WheelDriveChanged,
    /// Notice of one encoder tick
    EncoderReading,
    /// Notice of one gyro reading
    GyroReading,
}

const ROBOCOM_REQUESTS: &[(u8, RequestType)] = &[
    (0, RequestType::Noop),
    (1, RequestType::Echo),
    (2, RequestType::Reset),
    (3, RequestType::Flush),
    (4, RequestType::SetWheelDrive),
    (5, RequestType::EncoderReading),
    (6, RequestType::GyroReading),
    (7, RequestType::SetServoAngle),
];

const ROBOCOM_RESPONSES: &[(u8, ResponseType)] = &[
    (1, ResponseType::Echo),
    (3, ResponseType::Flush),
    (4, ResponseType::WheelDriveChanged),
    (5, ResponseType::EncoderReading),
    (6, ResponseType::GyroReading),
];

const REMOCON_REQUESTS: &[(u8, RequestType)] = &[
    (0, RequestType::Noop),
    (1, RequestType::Echo),
    (2, RequestType::Reset),
    (3, RequestType::Flush),
    (4, RequestType::SetWheelDrive),
    (6, RequestType::EncoderReading),
];

const REMOCON_RESPONSES: &[(u8, ResponseType)] = &[
    (1, ResponseType::Echo),
    (3, ResponseType::Flush),
    (5, ResponseType::WheelDriveChanged),
    (7, ResponseType::EncoderReading),
];

impl ProtocolVersion {
    fn requests(self) -> &'static [(u8, RequestType)] {
        match self {
            ProtocolVersion::Robocom => ROBOCOM_REQUESTS,
            ProtocolVersion::Remocon => REMOCON_REQUESTS,
        }
    }

    fn responses(self) -> &'static [(u8, ResponseType)] {
        match self {
            ProtocolVersion::Robocom => ROBOCOM_RESPONSES,
            ProtocolVersion::Remocon => REMOCON_RESPONSES,
        }
    }

    /// Wire id of a request type, if this version defines it
    pub fn request_type_id(self, request_type: RequestType) -> Option<u8> {
        self.requests()
            .iter()
            .find(|(_, t)| *t == request_type)
            .map(|(id, _)| *id)
    }

    /// Request type for a wire id
    pub fn request_type(self, id: u8) -> Option<RequestType> {
        self.requests()
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, t)| *t)
    }

    /// Wire id of a response type, if this version defines it
    pub fn response_type_id(self, response_type: ResponseType) -> Option<u8> {
        self.responses()
            .iter()
            .find(|(_, t)| *t == response_type)
            .map(|(id, _)| *id)
    }

    /// Response type for a wire id
    pub fn response_type(self, id: u8) -> Option<ResponseType> {
        self.responses()
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, t)| *t)
    }
}

/// Motor rotation direction, carried as a one-bit flag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Flag 0
    #[default]
    Forward,
    /// Flag 1
    Reverse,
}

impl Direction {
    /// Wire flag: 0 forward, 1 reverse
    pub fn to_byte(self) -> u8 {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    /// Any non-zero flag means reverse
    pub fn from_byte(b: u8) -> Self {
        if b == 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

/// Drive setting of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MotorDrive {
    /// Rotation direction
    pub direction: Direction,
    /// PWM magnitude, 0 stops the motor
    pub magnitude: u8,
}

impl MotorDrive {
    /// Drive one motor in `direction` at `magnitude`
    pub fn new(direction: Direction, magnitude: u8) -> Self {
        Self {
            direction,
            magnitude,
        }
    }
}

/// Drive settings of both wheels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WheelDrive {
    /// First (left) motor
    pub motor1: MotorDrive,
    /// Second (right) motor
    pub motor2: MotorDrive,
}

impl WheelDrive {
    /// Combine the settings of both motors
    pub fn new(motor1: MotorDrive, motor2: MotorDrive) -> Self {
        Self { motor1, motor2 }
    }

    /// Both motors stopped
    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Encoder subscription change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSubscription {
    /// Encoder index on the controller
    pub encoder_id: u8,
    /// `true` to subscribe, `false` to unsubscribe
    pub subscribe: bool,
}

/// Gyro subscription change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GyroSubscription {
    /// `true` to subscribe, `false` to unsubscribe
    pub subscribe: bool,
    /// Minimum delay between two readings
    pub min_delay_millis: u32,
}

/// Body of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// No operation
    Noop,
    /// Echo request
    Echo,
    /// Stop and clear subscriptions
    Reset,
    /// Queue barrier
    Flush,
    /// New drive for both wheels
    SetWheelDrive(WheelDrive),
    /// Servo position in whole degrees
    SetServoAngle {
        /// Servo index on the controller
        servo_id: u8,
        /// Target angle
        angle: u8,
    },
    /// Encoder subscription change
    EncoderReading(EncoderSubscription),
    /// Gyro subscription change
    GyroReading(GyroSubscription),
}

impl RequestKind {
    /// Registry type of this body
    pub fn request_type(&self) -> RequestType {
        match self {
            RequestKind::Noop => RequestType::Noop,
            RequestKind::Echo => RequestType::Echo,
            RequestKind::Reset => RequestType::Reset,
            RequestKind::Flush => RequestType::Flush,
            RequestKind::SetWheelDrive(_) => RequestType::SetWheelDrive,
            RequestKind::SetServoAngle { .. } => RequestType::SetServoAngle,
            RequestKind::EncoderReading(_) => RequestType::EncoderReading,
            RequestKind::GyroReading(_) => RequestType::GyroReading,
        }
    }
}

/// A request to the robot
///
/// Every constructor other than [`Request::with_task_id`] takes a fresh id from
/// the process-wide [`TaskIdSource`], so two requests built in the same process
/// never share an id until the 16-bit counter wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Id echoed back by every response to this request
    pub task_id: TaskId,
    /// Request body
    pub kind: RequestKind,
}

impl Request {
    /// Create a request with a fresh task id
    pub fn new(kind: RequestKind) -> Self {
        Self::with_task_id(TaskIdSource::global().next(), kind)
    }

    /// Create a request with an explicit task id
    pub fn with_task_id(task_id: TaskId, kind: RequestKind) -> Self {
        Self { task_id, kind }
    }

    /// No-op request
    pub fn noop() -> Self {
        Self::new(RequestKind::Noop)
    }

    /// Echo request
    pub fn echo() -> Self {
        Self::new(RequestKind::Echo)
    }

    /// Reset request
    pub fn reset() -> Self {
        Self::new(RequestKind::Reset)
    }

    /// Flush request
    pub fn flush() -> Self {
        Self::new(RequestKind::Flush)
    }

    /// Drive both wheels
    pub fn set_wheel_drive(
        m1_direction: Direction,
        m1_magnitude: u8,
        m2_direction: Direction,
        m2_magnitude: u8,
    ) -> Self {
        Self::new(RequestKind::SetWheelDrive(WheelDrive::new(
            MotorDrive::new(m1_direction, m1_magnitude),
            MotorDrive::new(m2_direction, m2_magnitude),
        )))
    }

    /// Angle in whole degrees, 0..=180 for the stock servo
    pub fn set_servo_angle(servo_id: u8, angle: u8) -> Self {
        Self::new(RequestKind::SetServoAngle { servo_id, angle })
    }

    /// Subscribe to (or unsubscribe from) one encoder
    pub fn subscribe_encoder(encoder_id: u8, subscribe: bool) -> Self {
        Self::new(RequestKind::EncoderReading(EncoderSubscription {
            encoder_id,
            subscribe,
        }))
    }

    /// Subscribe to (or unsubscribe from) the gyro
    pub fn subscribe_gyro(subscribe: bool, min_delay_millis: u32) -> Self {
        Self::new(RequestKind::GyroReading(GyroSubscription {
            subscribe,
            min_delay_millis,
        }))
    }
}

/// When a response was produced relative to its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    /// Answered while the request was being processed
    Immediate,
    /// Completed later; carries the controller's millis since the request
    Delayed {
        /// Controller millis between the request and this response
        millis: u32,
    },
}

/// Queue statistics reported by the controller in a flush response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlushStats {
    /// Fewest free task slots seen since the last flush
    pub min_free_slots: u8,
    /// Task slots free now
    pub free_slots: u8,
    /// Largest input queue depth seen
    pub input_queue_max_size: u8,
    /// Current input queue depth
    pub input_queue_size: u8,
    /// Largest output queue depth seen
    pub output_queue_max_size: u8,
    /// Current output queue depth
    pub output_queue_size: u8,
}

/// One encoder tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderReading {
    /// Encoder index on the controller
    pub encoder_id: u8,
    /// Running tick count
    pub tick_index: u32,
    /// Controller micros at the tick
    pub micros: u32,
}

/// Angle in hundredths of a degree, as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Angle(pub i16);

impl Angle {
    /// Round to the nearest hundredth, saturating at the i16 range
    pub fn from_degrees(degrees: f64) -> Self {
        let raw = (degrees * 100.0).round();
        Angle(raw.clamp(i16::MIN as f64, i16::MAX as f64) as i16)
    }

    /// Value in degrees
    pub fn degrees(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Raw wire value
    pub fn centidegrees(self) -> i16 {
        self.0
    }
}

/// One gyro reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GyroReading {
    /// Rotation about the vertical axis
    pub yaw: Angle,
    /// Rotation about the lateral axis
    pub pitch: Angle,
    /// Rotation about the longitudinal axis
    pub roll: Angle,
    /// Controller micros at the reading
    pub micros: u32,
}

/// Body of a response or notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    /// Echo answer
    Echo,
    /// Flush answer
    Flush(FlushStats),
    /// Wheel drive notice
    WheelDriveChanged(WheelDrive),
    /// Encoder tick notice
    EncoderReading(EncoderReading),
    /// Gyro notice
    GyroReading(GyroReading),
}

impl ResponseKind {
    /// Registry type of this body
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponseKind::Echo => ResponseType::Echo,
            ResponseKind::Flush(_) => ResponseType::Flush,
            ResponseKind::WheelDriveChanged(_) => ResponseType::WheelDriveChanged,
            ResponseKind::EncoderReading(_) => ResponseType::EncoderReading,
            ResponseKind::GyroReading(_) => ResponseType::GyroReading,
        }
    }
}

/// A response or notice from the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers
    pub task_id: TaskId,
    /// Immediate or delayed
    pub timing: Timing,
    /// Response body
    pub kind: ResponseKind,
}

impl Response {
    /// Assemble a response
    pub fn new(task_id: TaskId, timing: Timing, kind: ResponseKind) -> Self {
        Self {
            task_id,
            timing,
            kind,
        }
    }

    /// Whether the type byte carried the immediate flag
    pub fn is_immediate(&self) -> bool {
        matches!(self.timing, Timing::Immediate)
    }

    /// Controller millis between the request and this response; `None` for
    /// immediate responses
    pub fn millis_since_request(&self) -> Option<u32> {
        match self.timing {
            Timing::Immediate => None,
            Timing::Delayed { millis } => Some(millis),
        }
    }

    /// Queue statistics if this is a flush response
    pub fn flush_stats(&self) -> Option<&FlushStats> {
        match &self.kind {
            ResponseKind::Flush(stats) => Some(stats),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robocom_ids_are_shared() {
        let v = ProtocolVersion::Robocom;
        assert_eq!(v.request_type_id(RequestType::SetWheelDrive), Some(4));
        assert_eq!(v.response_type_id(ResponseType::WheelDriveChanged), Some(4));
        assert_eq!(v.request_type_id(RequestType::GyroReading), Some(6));
        assert_eq!(v.request_type_id(RequestType::SetServoAngle), Some(7));
        assert_eq!(v.response_type(6), Some(ResponseType::GyroReading));
    }

    #[test]
    fn test_remocon_has_no_gyro_or_servo() {
        let v = ProtocolVersion::Remocon;
        assert_eq!(v.request_type_id(RequestType::GyroReading), None);
        assert_eq!(v.request_type_id(RequestType::SetServoAngle), None);
        assert_eq!(v.response_type_id(ResponseType::GyroReading), None);
        assert_eq!(v.response_type(5), Some(ResponseType::WheelDriveChanged));
        assert_eq!(v.response_type(7), Some(ResponseType::EncoderReading));
        assert_eq!(v.request_type(6), Some(RequestType::EncoderReading));
    }

    #[test]
    fn test_unknown_ids() {
        assert_eq!(ProtocolVersion::Robocom.response_type(0), None);
        assert_eq!(ProtocolVersion::Robocom.response_type(0x7F), None);
        assert_eq!(ProtocolVersion::Remocon.request_type(7), None);
    }

    #[test]
    fn test_angle_conversion() {
        assert_eq!(Angle::from_degrees(12.34), Angle(1234));
        assert_eq!(Angle::from_degrees(-0.5), Angle(-50));
        assert_eq!(Angle(-18000).degrees(), -180.0);
        assert_eq!(Angle::from_degrees(1e9), Angle(i16::MAX));
    }

    #[test]
    fn test_direction_flag() {
        assert_eq!(Direction::from_byte(0), Direction::Forward);
        assert_eq!(Direction::from_byte(1), Direction::Reverse);
        assert_eq!(Direction::from_byte(0xFF), Direction::Reverse);
        assert_eq!(Direction::Reverse.to_byte(), 1);
    }

    #[test]
    fn test_builders_take_fresh_ids() {
        let a = Request::echo();
        let b = Request::flush();
        assert_ne!(a.task_id, b.task_id);
        assert_eq!(b.kind, RequestKind::Flush);
    }

    #[test]
    fn test_response_timing_accessors() {
        let r = Response::new(3, Timing::Immediate, ResponseKind::Echo);
        assert!(r.is_immediate());
        assert_eq!(r.millis_since_request(), None);

        let r = Response::new(
            3,
            Timing::Delayed { millis: 250 },
            ResponseKind::Flush(FlushStats::default()),
        );
        assert!(!r.is_immediate());
        assert_eq!(r.millis_since_request(), Some(250));
        assert!(r.flush_stats().is_some());
    }
}
