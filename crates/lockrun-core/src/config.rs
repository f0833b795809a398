//! Immutable run configuration shared by every backend.

use std::time::Duration;

use crate::error::{LockError, LockResult};
use crate::identity::Identity;

/// Default interval between lease renewals.
pub const DEFAULT_LEASE_INTERVAL: Duration = Duration::from_secs(15);

/// Default delay between the interrupt signal and the forceful kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Lease and shutdown parameters for one run.
///
/// Built once at startup and handed to the locking system and the process
/// supervisor. Nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    identity: Identity,
    lease_interval: Duration,
    lease_duration: Option<Duration>,
    grace_period: Duration,
}

impl LockConfig {
    /// Creates a configuration with default timings for `identity`.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            lease_interval: DEFAULT_LEASE_INTERVAL,
            lease_duration: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Sets the interval between lease renewals.
    pub fn lease_interval(mut self, interval: Duration) -> Self {
        self.lease_interval = interval;
        self
    }

    /// Sets the lease duration explicitly.
    ///
    /// `None` restores the default of twice the renewal interval.
    pub fn lease_duration(mut self, duration: Option<Duration>) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Sets the grace period between interrupt and kill.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Checks that the timings can drive a renewal loop.
    pub fn validate(self) -> LockResult<Self> {
        if self.lease_interval.is_zero() {
            return Err(LockError::InvalidConfig(
                "lease interval must be greater than zero".to_string(),
            ));
        }
        if self.effective_lease_duration() <= self.lease_interval {
            return Err(LockError::InvalidConfig(format!(
                "lease duration ({:?}) must be longer than the lease interval ({:?})",
                self.effective_lease_duration(),
                self.lease_interval
            )));
        }
        Ok(self)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn interval(&self) -> Duration {
        self.lease_interval
    }

    /// Returns the lease duration, defaulting to twice the interval.
    pub fn effective_lease_duration(&self) -> Duration {
        self.lease_duration.unwrap_or(self.lease_interval * 2)
    }

    pub fn grace(&self) -> Duration {
        self.grace_period
    }

    /// How long a holder may go without a successful renewal before it
    /// must consider the lock lost.
    ///
    /// Midway between the first missed renewal tick and the backend-side
    /// expiry, so the loss is reported while the lease is still valid.
    pub fn renew_deadline(&self) -> Duration {
        let lease = self.effective_lease_duration();
        lease - lease.saturating_sub(self.lease_interval) / 2
    }
}

/// Parses a duration such as `300ms`, `15s`, `1m30s`, `1.5s` or `2h`.
///
/// Units are `ns`, `us`, `ms`, `s`, `m` and `h`. Components may be
/// concatenated; a bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("duration '{input}' is missing a unit"))?;
        if number_len == 0 {
            return Err(format!("invalid duration '{input}'"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number '{number}' in duration '{input}'"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => {
                return Err(format!(
                    "unknown unit '{unit}' in duration '{input}'; expected ns, us, ms, s, m or h"
                ));
            }
        };
        total_nanos += value * nanos_per_unit;
        rest = next;
    }

    if !total_nanos.is_finite() || total_nanos >= u64::MAX as f64 {
        return Err(format!("duration '{input}' is out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LockConfig {
        LockConfig::new(Identity::new("test"))
    }

    #[test]
    fn test_lease_duration_defaults_to_twice_interval() {
        let config = config().lease_interval(Duration::from_secs(10));
        assert_eq!(config.effective_lease_duration(), Duration::from_secs(20));
        assert_eq!(config.renew_deadline(), Duration::from_secs(15));
    }

    #[test]
    fn test_renew_deadline_falls_before_expiry() {
        let config = config()
            .lease_interval(Duration::from_secs(10))
            .lease_duration(Some(Duration::from_secs(11)));
        assert!(config.renew_deadline() > config.interval());
        assert!(config.renew_deadline() < config.effective_lease_duration());
    }

    #[test]
    fn test_explicit_lease_duration_wins() {
        let config = config()
            .lease_interval(Duration::from_secs(10))
            .lease_duration(Some(Duration::from_secs(45)));
        assert_eq!(config.effective_lease_duration(), Duration::from_secs(45));
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.interval(), Duration::from_secs(15));
        assert_eq!(config.effective_lease_duration(), Duration::from_secs(30));
        assert_eq!(config.grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        assert!(config().lease_interval(Duration::ZERO).validate().is_err());
        assert!(
            config()
                .lease_interval(Duration::from_secs(10))
                .lease_duration(Some(Duration::from_secs(10)))
                .validate()
                .is_err()
        );
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("15s"), Ok(Duration::from_secs(15)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10parsecs").is_err());
        assert!(parse_duration("-5s").is_err());
    }
}
