use pretty_assertions::assert_eq;
use robocom_core::client::{Client, Commands};
use robocom_core::protocol::{
    Direction, EncoderReading, FlushStats, FrameCodec, MemoryLink, ProtocolError,
    ProtocolVersion, Request, RequestKind, Response, ResponseKind, Timing, WheelDrive,
};
use robocom_core::sim::{SimulatedRobot, QUEUE_SLOTS, SERVO_BASE_ANGLE};
use std::time::{Duration, Instant};

fn notice(task_id: u16, tick_index: u32) -> Response {
    Response::new(
        task_id,
        Timing::Delayed { millis: 5 },
        ResponseKind::EncoderReading(EncoderReading {
            encoder_id: 0,
            tick_index,
            micros: 1000 * tick_index,
        }),
    )
}

#[test]
fn test_flush_correlation_under_interleaving() {
    let codec = FrameCodec::default();
    let flush = Request::with_task_id(500, RequestKind::Flush);
    let first = notice(10, 1);
    let second = Response::new(
        11,
        Timing::Delayed { millis: 6 },
        ResponseKind::WheelDriveChanged(WheelDrive::stopped()),
    );
    let flushed = Response::new(
        500,
        Timing::Delayed { millis: 7 },
        ResponseKind::Flush(FlushStats::default()),
    );

    let mut link = MemoryLink::new();
    for response in [&first, &second, &flushed] {
        link.feed(&codec.frame_response(response).unwrap());
    }

    let mut client = Client::new(link, ProtocolVersion::Robocom);
    let got = client.flush_with(flush, Duration::from_secs(1)).unwrap();
    assert_eq!(got, flushed);

    assert_eq!(client.poll().unwrap(), Some(first));
    assert_eq!(client.poll().unwrap(), Some(second));
    assert_eq!(client.poll().unwrap(), None);
    assert_eq!(
        client.transport().written(),
        codec.frame_request(&flush).unwrap().as_slice()
    );
}

#[test]
fn test_flush_timeout_is_bounded() {
    let codec = FrameCodec::default();
    // Traffic keeps arriving, just never the flush response
    let mut link = MemoryLink::new();
    for i in 0..50 {
        link.feed(&codec.frame_response(&notice(1, i)).unwrap());
    }

    let mut client = Client::new(link, ProtocolVersion::Robocom);
    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    let err = client
        .flush_with(Request::with_task_id(60_000, RequestKind::Flush), timeout)
        .unwrap_err();
    let elapsed = start.elapsed();

    match err {
        ProtocolError::Timeout { waited_ms, .. } => assert!(waited_ms >= 100),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed < timeout + Duration::from_millis(500));
    // Nothing was lost while waiting
    assert_eq!(client.drain().unwrap().len(), 50);
}

#[test]
fn test_drain_continues_past_dropped_frames() {
    let codec = FrameCodec::default();
    let mut link = MemoryLink::new();
    link.feed(&codec.frame_response(&notice(1, 1)).unwrap());
    link.feed(&[b'>', 4, 0x81, 2, 0, b'?']);
    link.feed(&codec.frame_response(&notice(3, 2)).unwrap());

    let mut client = Client::new(link, ProtocolVersion::Robocom);
    let ids: Vec<u16> = client
        .drain()
        .unwrap()
        .into_iter()
        .map(|r| r.task_id)
        .collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(client.stats().dropped, 1);
}

#[test]
fn test_simulated_session() {
    let robot = SimulatedRobot::with_seed(ProtocolVersion::Robocom, 1);
    let mut client = Client::new(robot, ProtocolVersion::Robocom);

    let echo = client.echo(Duration::from_secs(1)).unwrap();
    assert!(echo.is_immediate());

    let drive_id = client
        .drive(Direction::Forward, 100, Direction::Reverse, 50)
        .unwrap();
    let encoder_id = client.subscribe_encoder(0).unwrap();

    let flushed = client.flush(Duration::from_secs(1)).unwrap();
    let stats = flushed.flush_stats().copied().unwrap();
    assert_eq!(stats.output_queue_size, 0);
    assert_eq!(stats.output_queue_max_size, QUEUE_SLOTS);

    let messages = client.drain().unwrap();
    assert_eq!(messages[0].task_id, drive_id);
    assert!(matches!(
        messages[0].kind,
        ResponseKind::WheelDriveChanged(d) if d.motor2.direction == Direction::Reverse
    ));
    assert!(messages
        .iter()
        .any(|m| m.task_id == encoder_id && matches!(m.kind, ResponseKind::EncoderReading(_))));

    client.set_servo_angle(0, 30).unwrap();
    assert_eq!(client.transport().servo_angle(), 30);
    let reset_id = client.reset().unwrap();
    assert_eq!(client.transport().servo_angle(), SERVO_BASE_ANGLE);

    client.flush(Duration::from_secs(1)).unwrap();
    let messages = client.drain().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].task_id, reset_id);
    assert_eq!(
        messages[0].kind,
        ResponseKind::WheelDriveChanged(WheelDrive::stopped())
    );
}

#[test]
fn test_remocon_client_refuses_gyro() {
    let mut client = Client::new(MemoryLink::new(), ProtocolVersion::Remocon);
    assert!(matches!(
        client.subscribe_gyro(100),
        Err(ProtocolError::UnsupportedMessage { .. })
    ));
    assert!(client.transport().written().is_empty());
    client.subscribe_encoder(1).unwrap();
    assert_eq!(client.transport().written()[2], 0x86);
}
