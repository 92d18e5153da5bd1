use std::time::{Duration, Instant};

/// Error type for polling operations
#[derive(Debug)]
pub enum PollError<E> {
    /// Operation timed out
    Timeout,
    /// Error occurred in the condition/operation function
    ConditionError(E),
}

impl<E> std::fmt::Display for PollError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Timeout => write!(f, "Operation timed out"),
            PollError::ConditionError(e) => write!(f, "Condition error: {}", e),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::Timeout => None,
            PollError::ConditionError(e) => Some(e),
        }
    }
}

/// Poll a condition with timeout
///
/// Repeatedly calls `condition` until it returns `Ok(true)` or timeout is reached.
/// A zero `poll_interval` busy-polls without yielding; `Duration::MAX` as
/// timeout never expires.
///
/// # Returns
/// * `Ok(())` when condition returns `Ok(true)`
/// * `Err(PollError::Timeout)` when timeout is reached
/// * `Err(PollError::ConditionError(e))` when condition returns an error
///
/// # Example
/// ```
/// use std::time::Duration;
/// use wscan::utils::poll_until;
///
/// let mut polls = 0;
/// poll_until(
///     || {
///         polls += 1;
///         Ok::<bool, &str>(polls == 3)
///     },
///     Duration::from_secs(1),
///     Duration::ZERO,
/// )
/// .unwrap();
/// assert_eq!(polls, 3);
/// ```
pub fn poll_until<F, E>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Result<bool, E>,
{
    let start = Instant::now();

    loop {
        if start.elapsed() >= timeout {
            return Err(PollError::Timeout);
        }

        match condition() {
            Ok(true) => return Ok(()),
            Ok(false) => {
                if !poll_interval.is_zero() {
                    std::thread::sleep(poll_interval);
                }
            }
            Err(e) => return Err(PollError::ConditionError(e)),
        }
    }
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
                Ok::<bool, &str>(count >= 3)
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
            || Ok::<bool, &str>(false), // Never returns true
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(PollError::Timeout)));
    }

    #[test]
    fn test_poll_until_error() {
        let result = poll_until(
            || Err::<bool, &str>("test error"),
            Duration::from_millis(100),
            Duration::ZERO,
        );

        assert!(matches!(result, Err(PollError::ConditionError("test error"))));
    }

    #[test]
    fn test_unbounded_busy_poll() {
        let mut count = 0;
        let result = poll_until(
            || {
                count += 1;
                Ok::<bool, &str>(count == 1000)
            },
            Duration::MAX,
            Duration::ZERO,
        );
        assert!(result.is_ok());
    }
}
