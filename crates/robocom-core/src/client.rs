//! Client facade
//!
//! [`Client`] drives the protocol from the calling thread: requests are written
//! straight to the transport and [`Client::poll`] decodes whatever the robot has
//! sent so far. [`Client::flush`] is the synchronisation point. It sends a flush
//! request, which makes the controller write out everything it has queued, and
//! then waits for the matching response. Messages that arrive while waiting are
//! kept and handed out by later `poll` calls in arrival order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::protocol::{
    Direction, MessageIo, ProtocolError, ProtocolVersion, ReaderStats, Request, Response,
    SerialTransport, TaskId, Transport, WheelDrive,
};

/// Typed request helpers shared by [`Client`] and
/// [`RobotLink`](crate::worker::RobotLink)
///
/// Every helper builds a request with a fresh task id, hands it to
/// [`send`](Commands::send) and returns the id.
pub trait Commands {
    /// Send one request without waiting for anything
    fn send(&mut self, request: Request) -> Result<TaskId, ProtocolError>;

    /// Send a no-op
    fn noop(&mut self) -> Result<TaskId, ProtocolError> {
        self.send(Request::noop())
    }

    /// Discard all pending work on the robot and stop the wheels
    fn reset(&mut self) -> Result<TaskId, ProtocolError> {
        self.send(Request::reset())
    }

    /// Set both motor drives at once
    fn set_wheel_drive(&mut self, drive: WheelDrive) -> Result<TaskId, ProtocolError> {
        self.send(Request::set_wheel_drive(
            drive.motor1.direction,
            drive.motor1.magnitude,
            drive.motor2.direction,
            drive.motor2.magnitude,
        ))
    }

    /// Set both motor drives from their parts
    fn drive(
        &mut self,
        m1_direction: Direction,
        m1_magnitude: u8,
        m2_direction: Direction,
        m2_magnitude: u8,
    ) -> Result<TaskId, ProtocolError> {
        self.send(Request::set_wheel_drive(
            m1_direction,
            m1_magnitude,
            m2_direction,
            m2_magnitude,
        ))
    }

    /// Move servo `servo_id` to `angle` degrees
    fn set_servo_angle(&mut self, servo_id: u8, angle: u8) -> Result<TaskId, ProtocolError> {
        self.send(Request::set_servo_angle(servo_id, angle))
    }

    /// Ask for a notice on every tick of `encoder_id`
    fn subscribe_encoder(&mut self, encoder_id: u8) -> Result<TaskId, ProtocolError> {
        self.send(Request::subscribe_encoder(encoder_id, true))
    }

    /// Stop encoder tick notices
    fn unsubscribe_encoder(&mut self, encoder_id: u8) -> Result<TaskId, ProtocolError> {
        self.send(Request::subscribe_encoder(encoder_id, false))
    }

    /// Ask for gyro readings at most every `min_delay_millis`
    fn subscribe_gyro(&mut self, min_delay_millis: u32) -> Result<TaskId, ProtocolError> {
        self.send(Request::subscribe_gyro(true, min_delay_millis))
    }

    /// Stop gyro readings
    fn unsubscribe_gyro(&mut self) -> Result<TaskId, ProtocolError> {
        self.send(Request::subscribe_gyro(false, 0))
    }
}

/// Single-threaded protocol client
pub struct Client<T> {
    io: MessageIo<T>,
    pending: VecDeque<Response>,
    poll_interval: Duration,
}

impl Client<SerialTransport> {
    /// Open the configured serial port
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::open(config)?;
        Ok(Self::from_config(transport, config))
    }
}

impl<T: Transport> Client<T> {
    /// Client over `transport` with a 2ms poll interval
    pub fn new(transport: T, version: ProtocolVersion) -> Self {
        Self {
            io: MessageIo::new(transport, version),
            pending: VecDeque::new(),
            poll_interval: Duration::from_millis(2),
        }
    }

    /// Client over `transport` using the version and poll interval from `config`
    pub fn from_config(transport: T, config: &LinkConfig) -> Self {
        let mut client = Self::new(transport, config.protocol);
        client.poll_interval = config.poll_interval();
        client
    }

    /// Encode and send a request (fire and forget)
    pub fn write(&mut self, request: &Request) -> Result<(), ProtocolError> {
        self.io.write(request)
    }

    /// Next message from the robot, if one is available
    ///
    /// Messages set aside by [`flush`](Self::flush) or [`echo`](Self::echo) come
    /// first. Never blocks; malformed input just yields `None`.
    pub fn poll(&mut self) -> Result<Option<Response>, ProtocolError> {
        if let Some(response) = self.pending.pop_front() {
            return Ok(Some(response));
        }
        self.io.read()
    }

    /// Poll until nothing more is available
    pub fn drain(&mut self) -> Result<Vec<Response>, ProtocolError> {
        let mut out = Vec::new();
        loop {
            let dropped = self.io.stats().dropped;
            match self.poll()? {
                Some(response) => out.push(response),
                // A dropped frame may have good ones behind it
                None if self.io.stats().dropped != dropped => continue,
                None => break,
            }
        }
        Ok(out)
    }

    /// Send a flush request and wait for its response
    pub fn flush(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        self.flush_with(Request::flush(), timeout)
    }

    /// Like [`flush`](Self::flush), with a caller-built request
    pub fn flush_with(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        self.write(&request)?;
        self.await_task(request.task_id, timeout)
    }

    /// Send an echo request and wait for the robot to answer it
    pub fn echo(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        let request = Request::echo();
        self.write(&request)?;
        self.await_task(request.task_id, timeout)
    }

    /// Wait for the first message carrying `task_id`
    ///
    /// Other messages read meanwhile are queued for [`poll`](Self::poll).
    pub fn await_task(
        &mut self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        let start = Instant::now();
        loop {
            match self.io.read()? {
                Some(response) if response.task_id == task_id => {
                    debug!(
                        "Task {} answered after {}ms",
                        task_id,
                        start.elapsed().as_millis()
                    );
                    return Ok(response);
                }
                Some(response) => self.pending.push_back(response),
                None => {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        return Err(self.timed_out(task_id, elapsed));
                    }
                    std::thread::sleep(self.poll_interval.min(timeout - elapsed));
                    continue;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(self.timed_out(task_id, elapsed));
            }
        }
    }

    fn timed_out(&self, task_id: TaskId, elapsed: Duration) -> ProtocolError {
        warn!(
            "No response to task {} after {}ms",
            task_id,
            elapsed.as_millis()
        );
        ProtocolError::Timeout {
            task_id,
            waited_ms: elapsed.as_millis() as u64,
        }
    }

    /// Messages read but not yet handed out by `poll`
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Reader counters
    pub fn stats(&self) -> ReaderStats {
        self.io.stats()
    }

    /// (bytes written, frames written)
    pub fn tx_counters(&self) -> (u64, u64) {
        self.io.tx_counters()
    }

    /// Protocol version in use
    pub fn version(&self) -> ProtocolVersion {
        self.io.codec().version()
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        self.io.transport()
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        self.io.transport_mut()
    }

    /// Give the transport back, dropping any pending messages
    pub fn into_inner(self) -> T {
        self.io.into_inner()
    }
}

impl<T: Transport> Commands for Client<T> {
    fn send(&mut self, request: Request) -> Result<TaskId, ProtocolError> {
        self.write(&request)?;
        Ok(request.task_id)
    }
}
