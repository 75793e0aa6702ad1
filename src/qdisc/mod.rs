//! The DualPI2 queue discipline: classifier, admission, the coupled
//! mark/drop dequeue loop, and the timer pump driving the controller.

use std::fmt;
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{DualPi2Config, SchedulerType};
use crate::error::Error;
use crate::ip::{ecn_of, Ecn, Ipv4View};
use crate::metal::timer::PeriodicTimer;
use crate::packet::{Packet, PREAMBLE_LENGTH};

pub mod controller;
pub mod queue;
pub mod scheduler;

use controller::PiController;
use queue::{recur, ClassicQueue, L4sQueue, SubQueue};
use scheduler::{QueueKind, Scheduler, StrictPriority, WrrScheduler};

/// Queue discipline contract consumed by the enclosing shaper.
pub trait PacketQueue<P>: Send
where
    P: Packet,
{
    #[cfg(feature = "serde")]
    type Config: for<'a> Deserialize<'a> + Serialize + Send + Debug;
    #[cfg(not(feature = "serde"))]
    type Config: Send + Debug;

    fn configure(&mut self, config: Self::Config);

    fn enqueue(&mut self, packet: P);

    // If both sub-queues are empty, return `None`
    fn dequeue(&mut self) -> Option<P>;

    fn is_empty(&self) -> bool;

    fn length(&self) -> usize;

    fn byte_length(&self) -> usize;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DualPi2Stats {
    /// Packets dropped because the shared buffer was full.
    pub satur_drop_pkts: u64,
    /// Packets dropped by the coupled AQM decision.
    pub prob_drop_pkts: u64,
    /// Packets marked CE.
    pub mark_pkts: u64,
}

pub struct DualPi2Queue<P> {
    config: DualPi2Config,
    byte_limit: usize,
    l4s: L4sQueue<P>,
    classic: ClassicQueue<P>,
    scheduler: Box<dyn Scheduler>,
    controller: PiController,
    timer: PeriodicTimer,
    stats: DualPi2Stats,
}

impl<P> DualPi2Queue<P>
where
    P: Packet,
{
    pub fn new(config: DualPi2Config) -> Result<Self, Error> {
        config.validate()?;
        debug!(?config, "New DualPi2Queue");
        let (_, byte_limit) = config.resolved_limits();
        let timer = PeriodicTimer::new()?;
        timer.set_time(config.tupdate, config.tupdate)?;
        Ok(Self {
            l4s: L4sQueue::new(config.min_threshold, config.resolved_range()),
            classic: ClassicQueue::new(),
            scheduler: build_scheduler(&config),
            controller: PiController::new(&config),
            timer,
            byte_limit,
            stats: DualPi2Stats::default(),
            config,
        })
    }

    /// Construct from the shaper argument string (see
    /// [`DualPi2Config::from_args`]).
    pub fn from_args(args: &str) -> Result<Self, Error> {
        Self::new(DualPi2Config::from_args(args)?)
    }

    pub fn stats(&self) -> DualPi2Stats {
        self.stats
    }

    pub fn empty(&self) -> bool {
        self.l4s.is_empty() && self.classic.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.l4s.byte_length() + self.classic.byte_length()
    }

    pub fn size_packets(&self) -> usize {
        self.l4s.length() + self.classic.length()
    }

    /// Non-blocking timer pump; an elapsed tick runs the controller update
    /// before the caller proceeds. Read failures are logged and retried on
    /// the next pump.
    fn pump_timer(&mut self) {
        match self.timer.poll_expired() {
            Ok(0) => {}
            Ok(_expirations) => {
                let now = Instant::now();
                self.controller
                    .update(self.l4s.qdelay_ms(now), self.classic.qdelay_ms(now));
            }
            Err(e) => warn!("Failed to read periodic timer: {}", e),
        }
    }

    fn push(&mut self, packet: P) {
        self.pump_timer();

        // One MTU of headroom is always reserved so large packets are not
        // biased against.
        if self.size_bytes() + self.config.mtu as usize > self.byte_limit {
            self.stats.satur_drop_pkts += 1;
            trace!(
                queue_len = self.size_packets(),
                now_bytes = self.size_bytes(),
                header = ?format!("{:X?}", &packet.as_slice()[0..std::cmp::min(24, packet.length())]),
                "Drop packet(l3_len: {}) on buffer saturation",
                packet.l3_length()
            );
            return;
        }

        let ecn = packet
            .as_slice()
            .get(PREAMBLE_LENGTH..)
            .and_then(ecn_of)
            .unwrap_or(Ecn::NotEct);
        if ecn.is_l4s() {
            self.l4s.enqueue(packet);
        } else {
            self.classic.enqueue(packet);
        }

        self.pump_timer();
    }

    fn pop(&mut self) -> Option<P> {
        loop {
            self.pump_timer();

            let Some(kind) = self
                .scheduler
                .select_queue(self.l4s.is_empty(), self.classic.is_empty())
            else {
                self.pump_timer();
                return None;
            };

            let now = Instant::now();
            match kind {
                QueueKind::L4s => {
                    let mut packet = self.l4s.dequeue()?;

                    if !self.controller.l4s_is_overloaded() {
                        let native_prob = self.l4s.marking_prob(self.l4s.qdelay_ms(now));
                        let p_l = self.controller.l4s_prob(native_prob);
                        if recur(&mut self.l4s, p_l) && self.can_mark_or_drop() {
                            self.mark(&mut packet);
                        }
                    } else {
                        // Push back on unresponsive scalable flows with the
                        // Classic drop probability, then the coupled mark.
                        if recur(&mut self.l4s, self.controller.classic_prob())
                            && self.can_mark_or_drop()
                        {
                            self.drop(&packet);
                            continue;
                        }
                        if recur(&mut self.l4s, self.controller.coupled_prob())
                            && self.can_mark_or_drop()
                        {
                            self.mark(&mut packet);
                        }
                    }

                    self.scheduler.apply_credit_change(QueueKind::L4s);
                    self.pump_timer();
                    return Some(packet);
                }
                QueueKind::Classic => {
                    let mut packet = self.classic.dequeue()?;

                    if recur(&mut self.classic, self.controller.classic_prob()) {
                        let ecn = packet
                            .as_slice()
                            .get(PREAMBLE_LENGTH..)
                            .and_then(ecn_of)
                            .unwrap_or(Ecn::NotEct);
                        if (ecn == Ecn::NotEct || self.controller.classic_is_overloaded())
                            && self.can_mark_or_drop()
                        {
                            self.drop(&packet);
                            continue;
                        }
                        if self.can_mark_or_drop() {
                            self.mark(&mut packet);
                        }
                    }

                    self.scheduler.apply_credit_change(QueueKind::Classic);
                    self.pump_timer();
                    return Some(packet);
                }
            }
        }
    }

    // No congestion signalling while the shared buffer holds less than two
    // MTUs worth of payload.
    fn can_mark_or_drop(&self) -> bool {
        self.size_bytes() >= 2 * self.config.mtu as usize
    }

    fn mark(&mut self, packet: &mut P) {
        let Some(mut view) = packet
            .as_raw_buffer()
            .get_mut(PREAMBLE_LENGTH..)
            .and_then(Ipv4View::new)
        else {
            warn!("Cannot mark a packet without an IPv4 header");
            return;
        };
        view.set_ce();
        self.stats.mark_pkts += 1;
        trace!("Marked packet CE");
    }

    fn drop(&mut self, packet: &P) {
        self.stats.prob_drop_pkts += 1;
        trace!(
            queue_len = self.size_packets(),
            now_bytes = self.size_bytes(),
            "Drop packet(l3_len: {}) on AQM decision",
            packet.l3_length()
        );
    }

    #[cfg(test)]
    pub(crate) fn force_base_prob(&mut self, pp: f64) {
        self.controller.force_base_prob(pp);
    }
}

fn build_scheduler(config: &DualPi2Config) -> Box<dyn Scheduler> {
    match config.scheduler {
        SchedulerType::StrictPriority => Box::new(StrictPriority),
        SchedulerType::WeightedRoundRobin => {
            let (l4s_quantum, classic_quantum) = config.resolved_quanta();
            Box::new(WrrScheduler::new(l4s_quantum, classic_quantum))
        }
    }
}

impl<P> PacketQueue<P> for DualPi2Queue<P>
where
    P: Packet,
{
    type Config = DualPi2Config;

    fn configure(&mut self, config: Self::Config) {
        if let Err(e) = config.validate() {
            warn!("Rejecting queue config: {}", e);
            return;
        }
        debug!(?config, "Reconfigure DualPi2Queue");
        let (_, byte_limit) = config.resolved_limits();
        self.byte_limit = byte_limit;
        self.l4s
            .set_thresholds(config.min_threshold, config.resolved_range());
        self.controller.reconfigure(&config);
        if config.scheduler != self.config.scheduler
            || config.resolved_quanta() != self.config.resolved_quanta()
        {
            self.scheduler = build_scheduler(&config);
        }
        if config.tupdate != self.config.tupdate {
            if let Err(e) = self.timer.set_time(config.tupdate, config.tupdate) {
                warn!("Failed to re-arm periodic timer: {}", e);
            }
        }
        self.config = config;
    }

    fn enqueue(&mut self, packet: P) {
        self.push(packet);
    }

    fn dequeue(&mut self) -> Option<P> {
        self.pop()
    }

    fn is_empty(&self) -> bool {
        self.empty()
    }

    fn length(&self) -> usize {
        self.size_packets()
    }

    fn byte_length(&self) -> usize {
        self.size_bytes()
    }
}

impl<P> fmt::Display for DualPi2Queue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dualPI2")
    }
}
