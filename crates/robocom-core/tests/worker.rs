use pretty_assertions::assert_eq;
use robocom_core::client::Commands;
use robocom_core::config::LinkConfig;
use robocom_core::protocol::{
    ByteSink, ByteSource, Direction, EncoderReading, FlushStats, FrameCodec, MemoryLink,
    ProtocolError, ProtocolVersion, Request, RequestKind, Response, ResponseKind, Timing,
    WheelDrive,
};
use robocom_core::sim::SimulatedRobot;
use robocom_core::worker::RobotLink;
use std::io;
use std::time::{Duration, Instant};

fn config() -> LinkConfig {
    LinkConfig {
        idle_wait_ms: 5,
        ..LinkConfig::default()
    }
}

fn robot() -> SimulatedRobot {
    SimulatedRobot::with_seed(ProtocolVersion::Robocom, 42)
}

/// Link that accepts nothing
struct BrokenLink;

impl ByteSource for BrokenLink {
    fn available(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }

    fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<()> {
        Ok(())
    }
}

impl ByteSink for BrokenLink {
    fn write_bytes(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"))
    }
}

#[test]
fn test_flush_through_engine_thread() {
    let mut link = RobotLink::spawn(robot(), config()).unwrap();

    let drive_id = link
        .drive(Direction::Reverse, 80, Direction::Reverse, 80)
        .unwrap();
    let flushed = link.flush(Duration::from_secs(2)).unwrap();
    assert!(flushed.flush_stats().is_some());

    let notice = link.pop().unwrap().unwrap();
    assert_eq!(notice.task_id, drive_id);
    assert!(matches!(notice.kind, ResponseKind::WheelDriveChanged(_)));
    assert!(link.pop().unwrap().is_none());

    let robot = link.shutdown().unwrap();
    let kinds: Vec<RequestKind> = robot.requests().iter().map(|r| r.kind).collect();
    assert_eq!(kinds.len(), 2);
    assert_eq!(kinds[1], RequestKind::Flush);
}

#[test]
fn test_flush_keeps_earlier_notices_in_order() {
    let codec = FrameCodec::default();
    let drive = Response::new(
        10,
        Timing::Delayed { millis: 4 },
        ResponseKind::WheelDriveChanged(WheelDrive::stopped()),
    );
    let tick = Response::new(
        11,
        Timing::Delayed { millis: 9 },
        ResponseKind::EncoderReading(EncoderReading {
            encoder_id: 0,
            tick_index: 1,
            micros: 1500,
        }),
    );
    let flushed = Response::new(
        500,
        Timing::Delayed { millis: 12 },
        ResponseKind::Flush(FlushStats::default()),
    );
    let mut bytes = Vec::new();
    for response in [&drive, &tick, &flushed] {
        bytes.extend(codec.frame_response(response).unwrap());
    }

    let mut link = RobotLink::spawn(MemoryLink::with_incoming(&bytes), config()).unwrap();
    let got = link
        .flush_with(Request::with_task_id(500, RequestKind::Flush), Duration::from_secs(2))
        .unwrap();
    assert_eq!(got, flushed);

    assert_eq!(link.pop().unwrap(), Some(drive));
    assert_eq!(link.pop().unwrap(), Some(tick));
    assert_eq!(link.pop().unwrap(), None);
}

#[test]
fn test_echo_through_engine_thread() {
    let mut link = RobotLink::spawn(robot(), config()).unwrap();
    let echo = link.echo(Duration::from_secs(2)).unwrap();
    assert!(echo.is_immediate());
}

#[test]
fn test_silent_robot_times_out() {
    let mut silent = robot();
    silent.set_silent(true);
    let mut link = RobotLink::spawn(silent, config()).unwrap();

    let start = Instant::now();
    let err = link.flush(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_idle_flush_drains_notices() {
    let config = LinkConfig {
        idle_flush: true,
        ..config()
    };
    let mut link = RobotLink::spawn(robot(), config).unwrap();
    let encoder_id = link.subscribe_encoder(1).unwrap();
    link.drive(Direction::Forward, 10, Direction::Forward, 200)
        .unwrap();

    // No explicit flush: the engine issues its own while idle
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut saw_tick = false;
    while Instant::now() < deadline && !saw_tick {
        if let Some(message) = link.pop_timeout(Duration::from_millis(20)).unwrap() {
            saw_tick = message.task_id == encoder_id
                && matches!(message.kind, ResponseKind::EncoderReading(_));
        }
    }
    assert!(saw_tick);
}

#[test]
fn test_write_failure_reports_link_down() {
    let mut link = RobotLink::spawn(BrokenLink, config()).unwrap();
    link.noop().unwrap();

    let err = link.flush(Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, ProtocolError::LinkDown(_)), "{:?}", err);
    assert!(matches!(link.noop(), Err(ProtocolError::LinkDown(_))));
    link.shutdown().unwrap();
}
