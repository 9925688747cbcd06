//! Demo Mode - Simulated robot controller
//!
//! Speaks the controller side of the protocol so the host side can be exercised
//! without hardware. Behaves like the firmware:
//! - echo requests are answered at once
//! - everything else the controller has to say is queued (32 slots) and only
//!   written out when a flush request arrives, followed by the flush response
//! - reset clears the queues and subscriptions and stops the wheels
//!
//! Encoders tick while their wheel is driven; the gyro yaw drifts with the
//! difference between the two wheels plus a little noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io;
use std::time::Instant;
use tracing::{debug, trace, warn};

use crate::protocol::{
    Angle, ByteSink, ByteSource, Direction, EncoderReading, FlushStats, FrameCodec, FrameReader,
    GyroReading, MotorDrive, ProtocolVersion, Request, RequestKind, Response, ResponseKind,
    TaskId, Timing, WheelDrive,
};

/// Output queue capacity of the stock firmware
pub const QUEUE_SLOTS: u8 = 32;

/// Servo position after reset
pub const SERVO_BASE_ANGLE: u8 = 90;

#[derive(Debug, Clone, Copy)]
struct Subscription {
    task_id: TaskId,
    since: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
struct EncoderState {
    subscription: Option<Subscription>,
    tick_index: u32,
}

#[derive(Debug, Clone, Copy)]
struct GyroState {
    subscription: Subscription,
    min_delay_millis: u32,
    last_report: Option<Instant>,
}

/// In-process stand-in for the robot controller
pub struct SimulatedRobot {
    codec: FrameCodec,
    reader: FrameReader,
    /// Bytes written by the host, not yet parsed
    from_host: VecDeque<u8>,
    /// Bytes waiting for the host to read
    to_host: VecDeque<u8>,
    output_queue: VecDeque<Response>,
    min_free_slots: u8,
    drive: WheelDrive,
    servo_angle: u8,
    encoders: [EncoderState; 2],
    gyro: Option<GyroState>,
    yaw: f64,
    started: Instant,
    silent: bool,
    requests: Vec<Request>,
    rng: StdRng,
}

impl SimulatedRobot {
    /// Robot with entropy-seeded sensor noise
    pub fn new(version: ProtocolVersion) -> Self {
        Self::with_rng(version, StdRng::from_entropy())
    }

    /// Deterministic sensor noise
    pub fn with_seed(version: ProtocolVersion, seed: u64) -> Self {
        Self::with_rng(version, StdRng::seed_from_u64(seed))
    }

    fn with_rng(version: ProtocolVersion, rng: StdRng) -> Self {
        Self {
            codec: FrameCodec::new(version),
            reader: FrameReader::new(),
            from_host: VecDeque::new(),
            to_host: VecDeque::new(),
            output_queue: VecDeque::new(),
            min_free_slots: QUEUE_SLOTS,
            drive: WheelDrive::stopped(),
            servo_angle: SERVO_BASE_ANGLE,
            encoders: [EncoderState::default(); 2],
            gyro: None,
            yaw: 0.0,
            started: Instant::now(),
            silent: false,
            requests: Vec::new(),
            rng,
        }
    }

    /// Stop answering anything, as if the cable were pulled
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Put raw bytes on the line towards the host
    pub fn inject(&mut self, bytes: &[u8]) {
        self.to_host.extend(bytes.iter().copied());
    }

    /// Every request decoded so far, in arrival order
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Current wheel drive
    pub fn wheel_drive(&self) -> WheelDrive {
        self.drive
    }

    /// Current servo angle in degrees
    pub fn servo_angle(&self) -> u8 {
        self.servo_angle
    }

    /// Delayed responses waiting for the next flush
    pub fn queued(&self) -> usize {
        self.output_queue.len()
    }

    fn micros(&self) -> u32 {
        self.started.elapsed().as_micros() as u32
    }

    fn millis_since(since: Instant) -> u32 {
        since.elapsed().as_millis() as u32
    }

    fn send_now(&mut self, response: &Response) {
        match self.codec.frame_response(response) {
            Ok(bytes) => self.to_host.extend(bytes),
            Err(e) => warn!("Simulator cannot encode {:?}: {}", response, e),
        }
    }

    fn enqueue(&mut self, response: Response) {
        if self.output_queue.len() >= QUEUE_SLOTS as usize {
            warn!("Simulator output queue full, dropping {:?}", response);
            return;
        }
        self.output_queue.push_back(response);
        let free = QUEUE_SLOTS - self.output_queue.len() as u8;
        self.min_free_slots = self.min_free_slots.min(free);
    }

    fn process_incoming(&mut self) -> io::Result<()> {
        while let Some(raw) = self.reader.poll_frame(&mut self.from_host)? {
            match self.codec.decode_request_frame(&raw) {
                Ok(request) => self.handle(request),
                Err(e) => debug!("Simulator dropping frame {:?}: {}", raw, e),
            }
        }
        Ok(())
    }

    fn handle(&mut self, request: Request) {
        trace!("Simulator received {:?}", request);
        self.requests.push(request);
        if self.silent {
            return;
        }

        let received = Instant::now();
        match request.kind {
            RequestKind::Noop => {}
            RequestKind::Echo => {
                self.send_now(&Response::new(
                    request.task_id,
                    Timing::Immediate,
                    ResponseKind::Echo,
                ));
            }
            RequestKind::Reset => {
                self.output_queue.clear();
                self.encoders = [EncoderState::default(); 2];
                self.gyro = None;
                self.servo_angle = SERVO_BASE_ANGLE;
                self.drive = WheelDrive::stopped();
                self.enqueue(Response::new(
                    request.task_id,
                    Timing::Delayed { millis: 0 },
                    ResponseKind::WheelDriveChanged(self.drive),
                ));
            }
            RequestKind::Flush => self.flush(request.task_id, received),
            RequestKind::SetWheelDrive(drive) => {
                self.drive = drive;
                self.enqueue(Response::new(
                    request.task_id,
                    Timing::Delayed {
                        millis: Self::millis_since(received),
                    },
                    ResponseKind::WheelDriveChanged(drive),
                ));
            }
            RequestKind::SetServoAngle { angle, .. } => self.servo_angle = angle,
            RequestKind::EncoderReading(sub) => {
                let Some(encoder) = self.encoders.get_mut(sub.encoder_id as usize) else {
                    debug!("Simulator has no encoder {}", sub.encoder_id);
                    return;
                };
                encoder.subscription = sub.subscribe.then_some(Subscription {
                    task_id: request.task_id,
                    since: received,
                });
            }
            RequestKind::GyroReading(sub) => {
                self.gyro = sub.subscribe.then_some(GyroState {
                    subscription: Subscription {
                        task_id: request.task_id,
                        since: received,
                    },
                    min_delay_millis: sub.min_delay_millis,
                    last_report: None,
                });
            }
        }
    }

    fn update_sensors(&mut self) {
        let motors = [self.drive.motor1, self.drive.motor2];
        for (id, motor) in motors.iter().enumerate() {
            let encoder = self.encoders[id];
            let Some(sub) = encoder.subscription else {
                continue;
            };
            if motor.magnitude == 0 {
                continue;
            }
            let tick_index = encoder.tick_index.wrapping_add(1);
            self.encoders[id].tick_index = tick_index;
            let reading = EncoderReading {
                encoder_id: id as u8,
                tick_index,
                micros: self.micros(),
            };
            self.enqueue(Response::new(
                sub.task_id,
                Timing::Delayed {
                    millis: Self::millis_since(sub.since),
                },
                ResponseKind::EncoderReading(reading),
            ));
        }

        let signed = |m: MotorDrive| match m.direction {
            Direction::Forward => m.magnitude as f64,
            Direction::Reverse => -(m.magnitude as f64),
        };
        let turn = signed(self.drive.motor1) - signed(self.drive.motor2);
        self.yaw = wrap_degrees(self.yaw + turn * 0.01 + self.rng.gen_range(-0.05..0.05));

        let Some(gyro) = self.gyro else {
            return;
        };
        let due = gyro
            .last_report
            .map_or(true, |t| Self::millis_since(t) >= gyro.min_delay_millis);
        if !due {
            return;
        }

        let reading = GyroReading {
            yaw: Angle::from_degrees(self.yaw),
            pitch: Angle::from_degrees(self.rng.gen_range(-0.5..0.5)),
            roll: Angle::from_degrees(self.rng.gen_range(-0.5..0.5)),
            micros: self.micros(),
        };
        self.enqueue(Response::new(
            gyro.subscription.task_id,
            Timing::Delayed {
                millis: Self::millis_since(gyro.subscription.since),
            },
            ResponseKind::GyroReading(reading),
        ));
        if let Some(g) = self.gyro.as_mut() {
            g.last_report = Some(Instant::now());
        }
    }

    fn flush(&mut self, task_id: TaskId, received: Instant) {
        self.update_sensors();
        while let Some(response) = self.output_queue.pop_front() {
            self.send_now(&response);
        }

        let stats = FlushStats {
            min_free_slots: self.min_free_slots,
            free_slots: QUEUE_SLOTS - self.output_queue.len() as u8,
            input_queue_max_size: QUEUE_SLOTS,
            input_queue_size: 0,
            output_queue_max_size: QUEUE_SLOTS,
            output_queue_size: self.output_queue.len() as u8,
        };
        self.send_now(&Response::new(
            task_id,
            Timing::Delayed {
                millis: Self::millis_since(received),
            },
            ResponseKind::Flush(stats),
        ));
    }
}

fn wrap_degrees(d: f64) -> f64 {
    (d + 180.0).rem_euclid(360.0) - 180.0
}

impl ByteSource for SimulatedRobot {
    fn available(&mut self) -> io::Result<usize> {
        self.to_host.available()
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        self.to_host.peek_byte()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.to_host.read_byte()
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.to_host.read_bytes(buf)
    }
}

impl ByteSink for SimulatedRobot {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.from_host.extend(bytes.iter().copied());
        self.process_incoming()
    }
}
