//! Background engine thread
//!
//! [`RobotLink`] moves the transport onto a dedicated thread that owns it
//! exclusively. The caller talks to that thread through two channels: requests
//! go out on one, decoded messages come back on the other. While no request is
//! waiting the thread keeps polling the link, so notices are drained from the
//! controller's small output queue even when the caller is busy elsewhere.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::Commands;
use crate::config::LinkConfig;
use crate::protocol::{
    MessageIo, ProtocolError, Request, Response, SerialTransport, TaskId, Transport,
};

/// Caller to engine
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Encode and write this request
    Request(Request),
    /// Stop the engine loop and hand the transport back
    Shutdown,
}

/// Engine to caller
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A decoded message from the robot
    Message(Response),
    /// The transport failed; the engine has stopped
    LinkDown(String),
}

/// Handle to a running engine thread
pub struct RobotLink<T: Transport + Send + 'static> {
    outbound: Sender<Outbound>,
    inbound: Receiver<Inbound>,
    pending: VecDeque<Response>,
    handle: Option<JoinHandle<T>>,
    config: LinkConfig,
    link_down: Option<String>,
}

impl RobotLink<SerialTransport> {
    /// Open the configured serial port and start the engine on it
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        let transport = SerialTransport::open(config)?;
        Self::spawn(transport, config.clone())
    }
}

impl<T: Transport + Send + 'static> RobotLink<T> {
    /// Start the engine thread on `transport`
    pub fn spawn(transport: T, config: LinkConfig) -> Result<Self, ProtocolError> {
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel();

        let io = MessageIo::new(transport, config.protocol);
        let engine_config = config.clone();
        let handle = thread::Builder::new()
            .name("robocom-engine".to_string())
            .spawn(move || run_engine(io, outbound_rx, inbound_tx, engine_config))?;

        info!("Engine thread started ({:?})", config.protocol);
        Ok(Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            pending: VecDeque::new(),
            handle: Some(handle),
            config,
            link_down: None,
        })
    }

    /// Queue a request for the engine to write. Never blocks.
    pub fn write(&mut self, request: Request) -> Result<(), ProtocolError> {
        if let Some(reason) = &self.link_down {
            return Err(ProtocolError::LinkDown(reason.clone()));
        }
        self.outbound
            .send(Outbound::Request(request))
            .map_err(|_| ProtocolError::LinkDown("engine thread has stopped".into()))
    }

    /// Next message without waiting
    pub fn pop(&mut self) -> Result<Option<Response>, ProtocolError> {
        if let Some(response) = self.pending.pop_front() {
            return Ok(Some(response));
        }
        match self.inbound.try_recv() {
            Ok(item) => self.accept(item).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Next message, waiting at most `timeout`
    pub fn pop_timeout(&mut self, timeout: Duration) -> Result<Option<Response>, ProtocolError> {
        if let Some(response) = self.pending.pop_front() {
            return Ok(Some(response));
        }
        match self.inbound.recv_timeout(timeout) {
            Ok(item) => self.accept(item).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    /// Send a flush request and wait for its response
    ///
    /// Everything the robot sends before the flush response is kept, in
    /// order, for [`pop`](Self::pop).
    pub fn flush(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        self.flush_with(Request::flush(), timeout)
    }

    /// Like [`flush`](Self::flush), with a caller-built request
    pub fn flush_with(
        &mut self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        self.write(request)?;
        self.await_task(request.task_id, timeout)
    }

    /// [`flush`](Self::flush) with the configured timeout
    pub fn flush_default(&mut self) -> Result<Response, ProtocolError> {
        self.flush(self.config.flush_timeout())
    }

    /// Send an echo request and wait for the answer
    pub fn echo(&mut self, timeout: Duration) -> Result<Response, ProtocolError> {
        let request = Request::echo();
        self.write(request)?;
        self.await_task(request.task_id, timeout)
    }

    fn await_task(
        &mut self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        let start = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            match self.inbound.recv_timeout(remaining) {
                Ok(item) => {
                    let response = self.accept(item)?;
                    if response.task_id == task_id {
                        debug!(
                            "Task {} answered after {}ms",
                            task_id,
                            start.elapsed().as_millis()
                        );
                        return Ok(response);
                    }
                    self.pending.push_back(response);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let waited = start.elapsed();
                    warn!(
                        "No response to task {} after {}ms",
                        task_id,
                        waited.as_millis()
                    );
                    return Err(ProtocolError::Timeout {
                        task_id,
                        waited_ms: waited.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.disconnected()),
            }
        }
    }

    fn accept(&mut self, item: Inbound) -> Result<Response, ProtocolError> {
        match item {
            Inbound::Message(response) => Ok(response),
            Inbound::LinkDown(reason) => {
                self.link_down = Some(reason.clone());
                Err(ProtocolError::LinkDown(reason))
            }
        }
    }

    fn disconnected(&self) -> ProtocolError {
        ProtocolError::LinkDown(
            self.link_down
                .clone()
                .unwrap_or_else(|| "engine thread has stopped".to_string()),
        )
    }

    /// Messages received but not yet handed out by `pop`
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Settings the engine was started with
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Stop the engine thread and take the transport back
    ///
    /// Requests still queued are written first; a flush in flight is abandoned.
    pub fn shutdown(mut self) -> Result<T, ProtocolError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| ProtocolError::LinkDown("engine already stopped".into()))?;
        // The engine may already be gone after a link failure
        let _ = self.outbound.send(Outbound::Shutdown);
        handle
            .join()
            .map_err(|_| ProtocolError::LinkDown("engine thread panicked".into()))
    }
}

impl<T: Transport + Send + 'static> Commands for RobotLink<T> {
    fn send(&mut self, request: Request) -> Result<TaskId, ProtocolError> {
        self.write(request)?;
        Ok(request.task_id)
    }
}

impl<T: Transport + Send + 'static> Drop for RobotLink<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.outbound.send(Outbound::Shutdown);
            if handle.join().is_err() {
                warn!("Engine thread panicked");
            }
        }
    }
}

/// Engine loop; returns the transport once told to stop
///
/// Waits up to `idle_wait` for a request and writes it. When nothing arrives
/// it optionally writes a flush, then polls up to `drain_polls` times.
fn run_engine<T: Transport>(
    mut io: MessageIo<T>,
    outbound: Receiver<Outbound>,
    inbound: Sender<Inbound>,
    config: LinkConfig,
) -> T {
    let idle_wait = config.idle_wait();

    loop {
        let result = match outbound.recv_timeout(idle_wait) {
            Ok(Outbound::Request(request)) => io.write(&request),
            Ok(Outbound::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let flushed = if config.idle_flush {
                    io.write(&Request::flush())
                } else {
                    Ok(())
                };
                flushed.and_then(|()| drain(&mut io, &inbound, config.drain_polls))
            }
        };

        if let Err(e) = result {
            warn!("Link failed: {}", e);
            let _ = inbound.send(Inbound::LinkDown(e.to_string()));
            break;
        }
    }

    let stats = io.stats();
    let (tx_bytes, tx_frames) = io.tx_counters();
    info!(
        "Engine stopped: {} frames in ({} dropped), {} frames / {} bytes out",
        stats.frames, stats.dropped, tx_frames, tx_bytes
    );
    io.into_inner()
}

fn drain<T: Transport>(
    io: &mut MessageIo<T>,
    inbound: &Sender<Inbound>,
    max_polls: usize,
) -> Result<(), ProtocolError> {
    for _ in 0..max_polls {
        let dropped = io.stats().dropped;
        match io.read()? {
            Some(response) => {
                // Nobody is listening any more; shutdown will follow
                if inbound.send(Inbound::Message(response)).is_err() {
                    break;
                }
            }
            None if io.stats().dropped != dropped => continue,
            None => break,
        }
    }
    Ok(())
}
