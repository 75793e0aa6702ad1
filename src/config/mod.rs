//! Configuration for the DualPI2 queue.
//!
//! Two entry points: a plain config struct (serde-enabled, the way queue
//! configs are fed from shaper config files) and the shaper's argument
//! string grammar, whitespace-separated `name=value` pairs with decimal
//! integer values where 0 means "use the default".

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_MTU: u32 = 1500;
/// Default shared packet budget; 125 ms of buffer at 1 Gbps.
pub const DEFAULT_PACKET_LIMIT: usize = 10000;

const DEFAULT_TARGET: Duration = Duration::from_millis(15);
const DEFAULT_MAX_RTT: Duration = Duration::from_millis(100);
// RFC 9332: Tupdate = min(target, RTT_max / 3)
const DEFAULT_TUPDATE: Duration = Duration::from_millis(16);
// RFC 9332: alpha = 0.1 * Tupdate / RTT_max^2, beta = 0.3 / RTT_max, both in
// Hz. The time unit here is ms, so the gains are in kHz.
const DEFAULT_ALPHA: f64 = 0.00016;
const DEFAULT_BETA: f64 = 0.0032;
const DEFAULT_COUPLING: f64 = 2.0;
const DEFAULT_MIN_THRESHOLD: Duration = Duration::from_micros(800);

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerType {
    #[default]
    StrictPriority,
    WeightedRoundRobin,
}

impl TryFrom<u64> for SchedulerType {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Error> {
        match value {
            0 => Ok(SchedulerType::StrictPriority),
            1 => Ok(SchedulerType::WeightedRoundRobin),
            other => Err(Error::ConfigError(format!(
                "unknown scheduler variant {other}"
            ))),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct DualPi2Config {
    /// Shared packet budget; takes precedence over `byte_limit` when set.
    pub packet_limit: Option<usize>,
    /// Shared byte budget across both sub-queues.
    pub byte_limit: Option<usize>,
    pub mtu: u32,
    pub scheduler: SchedulerType,
    /// PI setpoint for the sojourn time of both queues.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub target: Duration,
    /// Worst-case RTT the gains are tuned for.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub max_rtt: Duration,
    /// Controller tick period.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub tupdate: Duration,
    /// PI integral gain (kHz).
    pub alpha: f64,
    /// PI proportional gain (kHz).
    pub beta: f64,
    /// Coupling factor `k` between the Classic and L4S probabilities.
    pub coupling: f64,
    /// Convert part of the L4S traffic to drops once the Classic side of
    /// the controller saturates.
    pub l4s_drop_on_overload: bool,
    /// Clamp the base probability to [0, 1] instead of the RFC 9332 cap of
    /// `1/k^2`.
    pub relaxed_pp_clamp: bool,
    /// Sojourn time below which the L4S native ramp never marks.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub min_threshold: Duration,
    /// Width of the L4S native ramp; defaults to `target`.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub range: Option<Duration>,
    /// WRR quantum consumed by serving the L4S queue; defaults to one MTU.
    pub l4s_quantum: Option<usize>,
    /// WRR quantum earned by serving the Classic queue; defaults to one MTU.
    pub classic_quantum: Option<usize>,
}

impl Default for DualPi2Config {
    fn default() -> Self {
        Self {
            packet_limit: None,
            byte_limit: None,
            mtu: DEFAULT_MTU,
            scheduler: SchedulerType::default(),
            target: DEFAULT_TARGET,
            max_rtt: DEFAULT_MAX_RTT,
            tupdate: DEFAULT_TUPDATE,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            coupling: DEFAULT_COUPLING,
            l4s_drop_on_overload: true,
            relaxed_pp_clamp: false,
            min_threshold: DEFAULT_MIN_THRESHOLD,
            range: None,
            l4s_quantum: None,
            classic_quantum: None,
        }
    }
}

impl DualPi2Config {
    /// Parse the shaper argument string, e.g. `"packets=500 sched=1"`.
    /// Unrecognized names are ignored; malformed tokens are fatal.
    pub fn from_args(args: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        for token in args.split_whitespace() {
            let (name, value) = token.split_once('=').ok_or_else(|| {
                Error::ConfigError(format!("could not parse queue argument \"{token}\""))
            })?;
            let value: u64 = value.parse().map_err(|_| {
                Error::ConfigError(format!("could not parse queue argument \"{token}\""))
            })?;
            if value == 0 {
                continue;
            }
            match name {
                "bytes" => config.byte_limit = Some(value as usize),
                "packets" => config.packet_limit = Some(value as usize),
                "sched" => config.scheduler = SchedulerType::try_from(value)?,
                "target" => config.target = Duration::from_millis(value),
                "max_rtt" => config.max_rtt = Duration::from_millis(value),
                "tupdate" => config.tupdate = Duration::from_millis(value),
                "alpha" => config.alpha = value as f64,
                "beta" => config.beta = value as f64,
                _ => debug!("Ignoring unrecognized queue argument \"{}\"", name),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.mtu == 0 {
            return Err(Error::ConfigError("mtu must be positive".to_string()));
        }
        if self.coupling <= 0.0 {
            return Err(Error::ConfigError(
                "coupling factor must be positive".to_string(),
            ));
        }
        if self.tupdate.is_zero() {
            return Err(Error::ConfigError("tupdate must be positive".to_string()));
        }
        if self.alpha < 0.0 || self.beta < 0.0 {
            return Err(Error::ConfigError(
                "controller gains must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the shared buffer budget to `(packets, bytes)`. The packet
    /// budget wins when both are set.
    pub fn resolved_limits(&self) -> (usize, usize) {
        let mtu = self.mtu as usize;
        match (self.packet_limit, self.byte_limit) {
            (Some(packets), _) => (packets, packets * mtu),
            (None, Some(bytes)) => (bytes / mtu, bytes),
            (None, None) => (DEFAULT_PACKET_LIMIT, DEFAULT_PACKET_LIMIT * mtu),
        }
    }

    pub fn resolved_range(&self) -> Duration {
        self.range.unwrap_or(self.target)
    }

    pub fn resolved_quanta(&self) -> (usize, usize) {
        let mtu = self.mtu as usize;
        (
            self.l4s_quantum.unwrap_or(mtu),
            self.classic_quantum.unwrap_or(mtu),
        )
    }

    /// `p_Cmax = min(1/k^2, 1)`, the Classic-side saturation point.
    pub fn p_cmax(&self) -> f64 {
        (1.0 / (self.coupling * self.coupling)).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn defaults_match_rfc_9332() {
        let config = DualPi2Config::default();
        assert_eq!(config.target, Duration::from_millis(15));
        assert_eq!(config.max_rtt, Duration::from_millis(100));
        assert_eq!(config.tupdate, Duration::from_millis(16));
        assert_eq!(config.alpha, 0.00016);
        assert_eq!(config.beta, 0.0032);
        assert_eq!(config.coupling, 2.0);
        assert_eq!(config.p_cmax(), 0.25);
        assert!(config.l4s_drop_on_overload);
        assert_eq!(
            config.resolved_limits(),
            (DEFAULT_PACKET_LIMIT, DEFAULT_PACKET_LIMIT * 1500)
        );
        assert_eq!(config.resolved_range(), config.target);
        assert_eq!(config.resolved_quanta(), (1500, 1500));
    }

    #[test_log::test]
    fn packet_budget_overrides_byte_budget() {
        let config = DualPi2Config::from_args("packets=5 bytes=999999").unwrap();
        assert_eq!(config.resolved_limits(), (5, 7500));
    }

    #[test_log::test]
    fn byte_budget_alone_derives_packets() {
        let config = DualPi2Config::from_args("bytes=30000").unwrap();
        assert_eq!(config.resolved_limits(), (20, 30000));
    }

    #[test_log::test]
    fn args_grammar_sets_controller_knobs() {
        let config =
            DualPi2Config::from_args("target=20 max_rtt=200 tupdate=10 sched=1 alpha=2").unwrap();
        assert_eq!(config.target, Duration::from_millis(20));
        assert_eq!(config.max_rtt, Duration::from_millis(200));
        assert_eq!(config.tupdate, Duration::from_millis(10));
        assert_eq!(config.scheduler, SchedulerType::WeightedRoundRobin);
        assert_eq!(config.alpha, 2.0);
        assert_eq!(config.beta, DEFAULT_BETA);
    }

    #[test_log::test]
    fn zero_values_keep_defaults() {
        let config = DualPi2Config::from_args("packets=0 bytes=0 target=0").unwrap();
        assert_eq!(config, DualPi2Config::default());
    }

    #[test_log::test]
    fn unknown_names_are_ignored() {
        let config = DualPi2Config::from_args("frobnicate=7 packets=3").unwrap();
        assert_eq!(config.packet_limit, Some(3));
    }

    #[test_log::test]
    fn malformed_tokens_are_fatal() {
        assert!(DualPi2Config::from_args("packets").is_err());
        assert!(DualPi2Config::from_args("packets=abc").is_err());
        assert!(DualPi2Config::from_args("packets=-3").is_err());
        assert!(DualPi2Config::from_args("sched=9").is_err());
    }

    #[test_log::test]
    fn validate_rejects_degenerate_parameters() {
        let mut config = DualPi2Config {
            coupling: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.coupling = 2.0;
        config.tupdate = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
