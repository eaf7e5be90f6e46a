//! Wait times between tasks.
//!
//! After every task a simulated user pauses before picking the next one. The
//! pause models the time a real visitor spends reading a page. Wait time never
//! counts towards request latency.

use rand::Rng;
use std::time::Duration;

/// How long a user waits after finishing a task.
///
/// # Examples
/// ```
/// use angple_loadtest::wait_time::WaitTime;
/// use std::time::Duration;
///
/// // Uniformly random delay between 1 and 3 seconds
/// let browse = WaitTime::between(Duration::from_secs(1), Duration::from_secs(3));
///
/// // One task every 2 seconds regardless of how long the task took
/// let paced = WaitTime::ConstantPacing(Duration::from_secs(2));
/// # let _ = (browse, paced);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum WaitTime {
    /// Always the same delay.
    Constant(Duration),

    /// Uniformly random delay in `[min, max]`.
    Between { min: Duration, max: Duration },

    /// Sleep whatever is left of the interval after the task ran, so a task
    /// starts at most once per interval.
    ConstantPacing(Duration),
}

impl WaitTime {
    pub fn between(min: Duration, max: Duration) -> Self {
        WaitTime::Between { min, max }
    }

    pub fn constant(duration: Duration) -> Self {
        WaitTime::Constant(duration)
    }

    /// Calculate the delay to apply after a task that took `task_runtime`.
    pub fn next_delay(&self, task_runtime: Duration) -> Duration {
        match self {
            WaitTime::Constant(duration) => *duration,
            WaitTime::Between { min, max } => {
                if min >= max {
                    return *min;
                }
                let secs = rand::thread_rng().gen_range(min.as_secs_f64()..=max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            WaitTime::ConstantPacing(interval) => interval.saturating_sub(task_runtime),
        }
    }
}
