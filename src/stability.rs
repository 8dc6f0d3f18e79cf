//! Waiting for a reading to settle after an instrument set point changes.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::OctalError;

/// When two successive readings count as "the same".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityCriterion {
    /// Largest accepted change between successive readings.
    pub tolerance: f64,
    /// Compare `|cur - prev| / |cur|` instead of `|cur - prev|`.
    pub relative: bool,
    /// Readings taken before giving up.
    pub max_polls: u32,
    /// Sleep between readings.
    #[serde(with = "crate::transport::tcp::duration_secs")]
    pub interval: Duration,
}

impl StabilityCriterion {
    /// Detector power: 0.1 % relative change, 20 readings 500 ms apart.
    pub fn optical_power() -> Self {
        Self {
            tolerance: 0.001,
            relative: true,
            max_polls: 20,
            interval: Duration::from_millis(500),
        }
    }

    /// Supply current: 50 µA absolute change.
    pub fn supply_current() -> Self {
        Self {
            tolerance: 5e-5,
            relative: false,
            max_polls: 20,
            interval: Duration::from_millis(500),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.tolerance >= 0.0) {
            return Err(format!("tolerance must be >= 0, got {}", self.tolerance));
        }
        if self.max_polls < 2 {
            return Err(format!("max_polls must be at least 2, got {}", self.max_polls));
        }
        Ok(())
    }

    fn is_settled(&self, prev: f64, cur: f64) -> bool {
        let diff = (cur - prev).abs();
        if self.relative {
            if cur == 0.0 {
                return diff == 0.0;
            }
            diff / cur.abs() <= self.tolerance
        } else {
            diff <= self.tolerance
        }
    }
}

impl Default for StabilityCriterion {
    fn default() -> Self {
        Self::optical_power()
    }
}

/// Outcome of [`wait_for_stable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settled {
    /// Last reading taken.
    pub value: f64,
    /// Number of readings taken.
    pub polls: u32,
    pub converged: bool,
}

/// Read until two successive readings agree within the criterion.
///
/// Running out of polls is not an error; the last reading is returned with
/// `converged = false`.
pub fn wait_for_stable<F>(mut read: F, criterion: &StabilityCriterion) -> Result<Settled, OctalError>
where
    F: FnMut() -> Result<f64, OctalError>,
{
    let mut prev = read()?;
    let mut polls = 1;

    while polls < criterion.max_polls.max(2) {
        std::thread::sleep(criterion.interval);
        let cur = read()?;
        polls += 1;
        if criterion.is_settled(prev, cur) {
            debug!("Settled at {cur:e} after {polls} readings");
            return Ok(Settled {
                value: cur,
                polls,
                converged: true,
            });
        }
        prev = cur;
    }

    warn!(
        "Reading did not settle within {} polls, last value {:e}",
        polls, prev
    );
    Ok(Settled {
        value: prev,
        polls,
        converged: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(mut c: StabilityCriterion) -> StabilityCriterion {
        c.interval = Duration::ZERO;
        c
    }

    #[test]
    fn test_converges_on_relative_change() {
        let readings = [1.0, 0.5, 0.9, 0.9005, 2.0];
        let mut i = 0;
        let settled = wait_for_stable(
            || {
                i += 1;
                Ok(readings[i - 1])
            },
            &fast(StabilityCriterion::optical_power()),
        )
        .unwrap();
        assert!(settled.converged);
        assert_eq!(settled.value, 0.9005);
        assert_eq!(settled.polls, 4);
    }

    #[test]
    fn test_gives_up_after_max_polls() {
        let mut x = 0.0;
        let mut criterion = fast(StabilityCriterion::supply_current());
        criterion.max_polls = 5;
        let settled = wait_for_stable(
            || {
                x += 1.0;
                Ok(x)
            },
            &criterion,
        )
        .unwrap();
        assert!(!settled.converged);
        assert_eq!(settled.polls, 5);
        assert_eq!(settled.value, 5.0);
    }

    #[test]
    fn test_zero_reading() {
        let settled = wait_for_stable(|| Ok(0.0), &fast(StabilityCriterion::optical_power())).unwrap();
        assert!(settled.converged);
        assert_eq!(settled.polls, 2);
    }

    #[test]
    fn test_read_error_propagates() {
        let result = wait_for_stable(
            || Err(OctalError::Timeout),
            &fast(StabilityCriterion::optical_power()),
        );
        assert!(matches!(result, Err(OctalError::Timeout)));
    }

    #[test]
    fn test_validate() {
        assert!(StabilityCriterion::default().validate().is_ok());
        let mut bad = StabilityCriterion::default();
        bad.max_polls = 1;
        assert!(bad.validate().is_err());
        bad.max_polls = 3;
        bad.tolerance = f64::NAN;
        assert!(bad.validate().is_err());
    }
}
