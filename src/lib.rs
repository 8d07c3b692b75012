//! Client for SolarMax inverters speaking the ASCII data query protocol over TCP.

#[macro_use]
extern crate log;

pub mod checksum;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod probe;
pub mod telemetry;

pub use crate::client::InverterClient;
pub use crate::connection::{Clock, Connection, ConnectionState, SystemClock};
pub use crate::error::{Result, SolarMaxError};
pub use crate::frame::Address;
pub use crate::probe::{IcmpProbe, ReachabilityProbe, SkipProbe};
pub use crate::telemetry::Command;
