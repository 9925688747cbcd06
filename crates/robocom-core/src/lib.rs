//! # Robocom Core Library
//!
//! Host side of the Robocom serial protocol used to drive a small wheeled robot
//! from a PC.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame encoding and incremental, non-blocking frame decoding
//! - The message registry for both firmware generations (Robocom and Remocon)
//! - Task-id correlation with a flush barrier
//! - A single-threaded [`Client`](client::Client) and a threaded
//!   [`RobotLink`](worker::RobotLink) over any byte transport
//! - A serial-port transport and an async `tokio` codec
//! - A simulated robot for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use robocom_core::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), ProtocolError> {
//! let config = LinkConfig::for_port("/dev/ttyACM0");
//! let mut client = Client::open(&config)?;
//!
//! client.drive(Direction::Forward, 120, Direction::Reverse, 120)?;
//! client.subscribe_encoder(0)?;
//!
//! let flushed = client.flush(Duration::from_secs(2))?;
//! println!("{:?}", flushed.flush_stats());
//! for message in client.drain()? {
//!     println!("{:?}", message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod protocol;
pub mod sim;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{Client, Commands};
    pub use crate::config::LinkConfig;
    pub use crate::protocol::{
        Direction, MotorDrive, ProtocolError, ProtocolVersion, Request, RequestKind, Response,
        ResponseKind, TaskId, Timing, Transport, WheelDrive,
    };
    pub use crate::sim::SimulatedRobot;
    pub use crate::worker::RobotLink;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
