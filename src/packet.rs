use std::fmt::Debug;

use etherparse::Ipv4Header;
use tokio::time::Instant;

use crate::ip::{ecn_of, Ecn};

/// Length of the link-layer preamble the enclosing shaper prepends to every
/// buffer; the IPv4 header starts right after it.
pub const PREAMBLE_LENGTH: usize = 4;

pub trait Packet: Debug + 'static + Send {
    fn from_raw_buffer(buf: &[u8]) -> Self;

    // Raw buffer length
    fn length(&self) -> usize;
    // Network layer length, i.e. the raw length without the link preamble
    fn l3_length(&self) -> usize;
    fn as_slice(&self) -> &[u8];
    fn as_raw_buffer(&mut self) -> &mut [u8];
    fn ip_hdr(&self) -> Option<Ipv4Header>;

    // Timestamp
    fn get_timestamp(&self) -> Instant;
    fn set_timestamp(&mut self, timestamp: Instant);

    // Packet description
    fn desc(&self) -> String {
        String::new()
    }
}

#[derive(Clone, Debug)]
pub struct StdPacket {
    buf: Vec<u8>,
    timestamp: Instant,
}

impl Packet for StdPacket {
    fn from_raw_buffer(buf: &[u8]) -> Self {
        Self {
            buf: buf.to_vec(),
            timestamp: Instant::now(),
        }
    }

    fn length(&self) -> usize {
        self.buf.len()
    }

    fn l3_length(&self) -> usize {
        self.buf.len().saturating_sub(PREAMBLE_LENGTH)
    }

    fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn as_raw_buffer(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    fn ip_hdr(&self) -> Option<Ipv4Header> {
        if let Some(l3) = self.buf.as_slice().get(PREAMBLE_LENGTH..) {
            if let Ok(ip_hdr) = etherparse::Ipv4Header::from_slice(l3) {
                return Some(ip_hdr.0);
            }
        }
        None
    }

    fn get_timestamp(&self) -> Instant {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: Instant) {
        self.timestamp = timestamp;
    }

    fn desc(&self) -> String {
        let mut desc = String::new();
        match self.ip_hdr() {
            Some(ip_hdr) => {
                let ecn = self
                    .buf
                    .get(PREAMBLE_LENGTH..)
                    .and_then(ecn_of)
                    .unwrap_or(Ecn::NotEct);
                desc.push_str(&format!(
                    "[IPv4] src: {:?} dst: {:?} len: {} ecn: {:?}",
                    ip_hdr.source, ip_hdr.destination, self.l3_length(), ecn
                ));
            }
            None => desc.push_str("[Unknown]"),
        }
        desc
    }
}
