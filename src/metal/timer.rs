use std::{
    os::fd::{AsFd, AsRawFd},
    time::Duration,
};

use nix::sys::{
    time::TimeSpec,
    timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags},
};

use crate::metal::error::MetalError;

// High-resolution periodic timer, polled from the qdisc fast path.
//
// The fd is level-triggered: a non-blocking read either consumes the number
// of expirations since the previous read (re-arming readiness) or fails with
// EAGAIN when the timer is not yet due.
pub struct PeriodicTimer {
    timer: TimerFd,
}

impl PeriodicTimer {
    pub fn new() -> Result<Self, MetalError> {
        Ok(Self {
            timer: TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_NONBLOCK)?,
        })
    }

    /// Arm the timer to first fire after `initial` and every `interval`
    /// thereafter. A zero `initial` would disarm the fd, so it is rejected.
    pub fn set_time(&self, initial: Duration, interval: Duration) -> Result<(), MetalError> {
        if initial.is_zero() {
            return Err(MetalError::SystemError(nix::errno::Errno::EINVAL));
        }
        self.timer.set(
            Expiration::IntervalDelayed(
                TimeSpec::from_duration(initial),
                TimeSpec::from_duration(interval),
            ),
            TimerSetTimeFlags::empty(),
        )?;
        Ok(())
    }

    /// Non-blocking pump. Returns the number of expirations since the last
    /// read, or 0 when the timer is not due (or not armed).
    pub fn poll_expired(&self) -> Result<u64, MetalError> {
        let mut buf = [0u8; 8];
        match nix::unistd::read(self.timer.as_fd().as_raw_fd(), &mut buf) {
            Ok(8) => Ok(u64::from_ne_bytes(buf)),
            Ok(_) => Ok(0),
            Err(nix::errno::Errno::EAGAIN) => Ok(0),
            Err(e) => Err(MetalError::from(e)),
        }
    }

    pub fn disarm(&self) -> Result<(), MetalError> {
        self.timer.unset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn unarmed_timer_is_never_due() -> Result<(), MetalError> {
        let timer = PeriodicTimer::new()?;
        assert_eq!(timer.poll_expired()?, 0);
        Ok(())
    }

    #[test_log::test]
    fn periodic_expirations_accumulate() -> Result<(), MetalError> {
        let timer = PeriodicTimer::new()?;
        timer.set_time(Duration::from_millis(2), Duration::from_millis(2))?;
        std::thread::sleep(Duration::from_millis(9));
        let expired = timer.poll_expired()?;
        assert!(expired >= 2, "expected at least 2 expirations, got {expired}");
        // The read consumed the count; the next poll starts over.
        assert_eq!(timer.poll_expired()?, 0);
        Ok(())
    }

    #[test_log::test]
    fn disarm_stops_expirations() -> Result<(), MetalError> {
        let timer = PeriodicTimer::new()?;
        timer.set_time(Duration::from_millis(2), Duration::from_millis(2))?;
        timer.disarm()?;
        std::thread::sleep(Duration::from_millis(6));
        assert_eq!(timer.poll_expired()?, 0);
        Ok(())
    }

    #[test_log::test]
    fn zero_initial_is_rejected() -> Result<(), MetalError> {
        let timer = PeriodicTimer::new()?;
        assert!(timer
            .set_time(Duration::ZERO, Duration::from_millis(2))
            .is_err());
        Ok(())
    }
}
