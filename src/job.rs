use crate::error::ScanError;

/// A long-running process that either completes with an output or fails.
///
/// The raster scan and the single-axis move are jobs. Neither has a timeout:
/// a job runs until it finishes or hits an error.
pub trait Job {
    /// The type returned on successful completion
    type Output;

    fn run(&mut self) -> Result<Self::Output, ScanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestJob {
        should_succeed: bool,
    }

    impl Job for TestJob {
        type Output = String;

        fn run(&mut self) -> Result<Self::Output, ScanError> {
            if self.should_succeed {
                Ok("success".to_string())
            } else {
                Err(ScanError::Timeout)
            }
        }
    }

    #[test]
    fn test_job_success() {
        let mut job = TestJob {
            should_succeed: true,
        };
        assert_eq!(job.run().unwrap(), "success");
    }

    #[test]
    fn test_job_failure() {
        let mut job = TestJob {
            should_succeed: false,
        };
        assert!(job.run().is_err());
    }
}
