//! Coupled dual-queue AQM (DualPI2, RFC 9332) for link emulators.
//!
//! The crate provides [`DualPi2Queue`], a queue discipline that classifies
//! IPv4 packets into an L4S and a Classic sub-queue by their ECN codepoint
//! and couples the two through a PI² controller: the controller's base
//! probability `pp` yields the Classic drop/mark probability `pp²` and the
//! coupled L4S marking component `pp · k`. A periodic timerfd drives the
//! controller; the qdisc pumps it non-blockingly from its enqueue and
//! dequeue paths, so the whole thing runs inside a single-threaded shaper
//! event loop without locks.

pub mod config;
pub mod error;
pub mod ip;
pub mod metal;
pub mod packet;
pub mod qdisc;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{DualPi2Config, SchedulerType};
pub use error::{Error, Result};
pub use packet::{Packet, StdPacket};
pub use qdisc::{DualPi2Queue, DualPi2Stats, PacketQueue};
