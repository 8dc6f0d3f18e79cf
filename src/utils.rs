use std::time::{Duration, Instant};

use crate::error::OctalError;

/// Poll an instrument state until `condition` reports completion.
///
/// Returns [`OctalError::Timeout`] once `timeout` has elapsed; errors from
/// `condition` are passed through unchanged.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use rusty_octal::utils::poll_until;
/// use rusty_octal::ResourceManager;
/// use rusty_octal::instruments::Agilent8163B;
///
/// let rm = ResourceManager::new().simulated(true);
/// let mut mm = Agilent8163B::open(&rm, "GPIB0::20::INSTR")?;
/// // Wait for a running wavelength sweep to stop
/// poll_until(
///     || mm.get_sweep_state().map(|running| !running),
///     Duration::from_secs(60),
///     Duration::from_millis(100),
/// )?;
/// # Ok::<(), rusty_octal::OctalError>(())
/// ```
pub fn poll_until<F>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), OctalError>
where
    F: FnMut() -> Result<bool, OctalError>,
{
    let start = Instant::now();

    loop {
        if condition()? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(OctalError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
}

/// Poll until `operation` yields a value.
///
/// `Ok(None)` means the deadline passed without a result.
pub fn poll_with_timeout<F, T>(
    mut operation: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<T>, OctalError>
where
    F: FnMut() -> Result<Option<T>, OctalError>,
{
    let start = Instant::now();

    loop {
        if let Some(result) = operation()? {
            return Ok(Some(result));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        std::thread::sleep(poll_interval);
    }
}

/// Round to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_until_success() {
        let mut count = 0;
        let result = poll_until(
            || {
                count += 1;
                Ok(count >= 3)
            },
            Duration::from_millis(500),
            Duration::from_millis(10),
        );

        assert!(result.is_ok());
        assert_eq!(count, 3);
    }

    #[test]
    fn test_poll_until_timeout() {
        let result = poll_until(
            || Ok(false),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(OctalError::Timeout)));
    }

    #[test]
    fn test_poll_until_error() {
        let result = poll_until(
            || Err(OctalError::Parse("garbled".into())),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(OctalError::Parse(_))));
    }

    #[test]
    fn test_poll_with_timeout() {
        let mut count = 0;
        let found = poll_with_timeout(
            || {
                count += 1;
                Ok((count >= 3).then_some(count))
            },
            Duration::from_millis(500),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(found, Some(3));

        let none = poll_with_timeout(
            || Ok::<Option<()>, _>(None),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.234567, 5), 1.23457);
        assert_eq!(round_to(-0.000004, 5), -0.0);
    }
}
