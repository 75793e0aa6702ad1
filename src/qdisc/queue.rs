use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::packet::Packet;

/// Contract both coupled sub-queues implement. Arrival timestamps are
/// (re)stamped on enqueue, so sojourn time is measured from the moment the
/// packet entered this queue, not the shaper.
pub trait SubQueue<P>: Send
where
    P: Packet,
{
    fn enqueue(&mut self, packet: P);

    // If the queue is empty, return `None`
    fn dequeue(&mut self) -> Option<P>;

    /// Sojourn time of the head packet against `reference`, truncated to
    /// whole milliseconds; 0 when empty.
    fn qdelay_ms(&self, reference: Instant) -> u64;

    fn byte_length(&self) -> usize;

    fn length(&self) -> usize;

    fn is_empty(&self) -> bool;

    fn recur_count(&self) -> f64;

    fn set_recur_count(&mut self, count: f64);
}

/// Deterministic dithering: accumulate `likelihood` into the queue's recur
/// counter and fire once per overflow past 1. Produces an evenly spaced
/// action pattern with an average rate of `likelihood` per call.
pub(crate) fn recur<P, Q>(queue: &mut Q, likelihood: f64) -> bool
where
    P: Packet,
    Q: SubQueue<P> + ?Sized,
{
    let count = queue.recur_count() + likelihood;
    if count > 1.0 {
        queue.set_recur_count(count - 1.0);
        true
    } else {
        queue.set_recur_count(count);
        false
    }
}

#[derive(Debug)]
struct FifoQueue<P> {
    queue: VecDeque<P>,
    now_bytes: usize,
    recur_count: f64,
}

impl<P> Default for FifoQueue<P> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            now_bytes: 0,
            recur_count: 0.0,
        }
    }
}

impl<P> FifoQueue<P>
where
    P: Packet,
{
    fn enqueue(&mut self, mut packet: P) {
        packet.set_timestamp(Instant::now());
        self.now_bytes += packet.l3_length();
        self.queue.push_back(packet);
    }

    fn dequeue(&mut self) -> Option<P> {
        match self.queue.pop_front() {
            Some(packet) => {
                self.now_bytes -= packet.l3_length();
                Some(packet)
            }
            None => None,
        }
    }

    fn qdelay_ms(&self, reference: Instant) -> u64 {
        self.queue
            .front()
            .map(|packet| {
                reference
                    .saturating_duration_since(packet.get_timestamp())
                    .as_millis() as u64
            })
            .unwrap_or(0)
    }
}

/// FIFO for non-scalable (Not-ECT / ECT(0)) traffic.
#[derive(Debug)]
pub struct ClassicQueue<P> {
    inner: FifoQueue<P>,
}

impl<P> ClassicQueue<P> {
    pub fn new() -> Self {
        debug!("New ClassicQueue");
        Self {
            inner: FifoQueue::default(),
        }
    }
}

impl<P> Default for ClassicQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SubQueue<P> for ClassicQueue<P>
where
    P: Packet,
{
    fn enqueue(&mut self, packet: P) {
        self.inner.enqueue(packet);
    }

    fn dequeue(&mut self) -> Option<P> {
        self.inner.dequeue()
    }

    fn qdelay_ms(&self, reference: Instant) -> u64 {
        self.inner.qdelay_ms(reference)
    }

    fn byte_length(&self) -> usize {
        self.inner.now_bytes
    }

    fn length(&self) -> usize {
        self.inner.queue.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    fn recur_count(&self) -> f64 {
        self.inner.recur_count
    }

    fn set_recur_count(&mut self, count: f64) {
        self.inner.recur_count = count;
    }
}

/// FIFO for scalable (ECT(1) / CE) traffic, with the native step-threshold
/// marking ramp of RFC 9332.
#[derive(Debug)]
pub struct L4sQueue<P> {
    inner: FifoQueue<P>,
    min_threshold: Duration,
    range: Duration,
}

impl<P> L4sQueue<P> {
    pub fn new(min_threshold: Duration, range: Duration) -> Self {
        debug!(?min_threshold, ?range, "New L4sQueue");
        Self {
            inner: FifoQueue::default(),
            min_threshold,
            range,
        }
    }

    pub fn set_thresholds(&mut self, min_threshold: Duration, range: Duration) {
        self.min_threshold = min_threshold;
        self.range = range;
    }

    /// Native marking probability: 0 up to the minimum threshold, 1 past
    /// threshold + range, linear ramp in between.
    pub fn marking_prob(&self, qdelay_ms: u64) -> f64 {
        let min_threshold_ms = self.min_threshold.as_secs_f64() * 1e3;
        let range_ms = self.range.as_secs_f64() * 1e3;
        let qdelay_ms = qdelay_ms as f64;
        if qdelay_ms <= min_threshold_ms {
            0.0
        } else if range_ms <= 0.0 || qdelay_ms >= min_threshold_ms + range_ms {
            1.0
        } else {
            (qdelay_ms - min_threshold_ms) / range_ms
        }
    }
}

impl<P> SubQueue<P> for L4sQueue<P>
where
    P: Packet,
{
    fn enqueue(&mut self, packet: P) {
        self.inner.enqueue(packet);
    }

    fn dequeue(&mut self) -> Option<P> {
        self.inner.dequeue()
    }

    fn qdelay_ms(&self, reference: Instant) -> u64 {
        self.inner.qdelay_ms(reference)
    }

    fn byte_length(&self) -> usize {
        self.inner.now_bytes
    }

    fn length(&self) -> usize {
        self.inner.queue.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    fn recur_count(&self) -> f64 {
        self.inner.recur_count
    }

    fn set_recur_count(&mut self, count: f64) {
        self.inner.recur_count = count;
    }
}
