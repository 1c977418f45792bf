use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::HomefluxResult;

type JobFuture = Pin<Box<dyn Future<Output = HomefluxResult<usize>> + Send>>;
type JobFn = Box<dyn Fn() -> JobFuture + Send + Sync>;

/// One recurring collection job: a bound routine and a fixed interval.
///
/// Every failure inside a cycle is caught and logged at the cycle
/// boundary; nothing terminates the loop or touches other jobs.
pub struct Job {
    name: String,
    interval: Duration,
    run: JobFn,
}

impl Job {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HomefluxResult<usize>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            run: Box::new(move || -> JobFuture { Box::pin(f()) }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one cycle, logging the outcome with elapsed time. Returns the
    /// elapsed time so the loop can correct its sleep.
    async fn run_cycle(&self) -> Duration {
        let started = Instant::now();
        match (self.run)().await {
            Ok(records) => info!(
                job = %self.name,
                records,
                elapsed = ?started.elapsed(),
                "cycle complete",
            ),
            Err(e) => error!(
                job = %self.name,
                error = %e,
                elapsed = ?started.elapsed(),
                "cycle failed",
            ),
        }
        started.elapsed()
    }

    async fn run_loop(self) {
        info!(job = %self.name, interval = ?self.interval, "job started");
        loop {
            let elapsed = self.run_cycle().await;
            let delay = next_delay(self.interval, elapsed);
            if delay.is_zero() {
                warn!(
                    job = %self.name,
                    elapsed = ?elapsed,
                    "cycle overran its interval, starting next cycle immediately",
                );
            }
            tokio::time::sleep(delay).await;
        }
    }
}

/// Time to sleep after a cycle: the remainder of the interval, or zero
/// when the cycle overran. Overruns skip missed slots, they never queue.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Runs every registered job on its own schedule, forever, with per-job
/// failure isolation.
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self { jobs }
    }

    /// Spawn one task per job and run until the process is terminated.
    pub async fn run_forever(self) {
        let mut handles = Vec::new();
        for job in self.jobs {
            handles.push(tokio::spawn(job.run_loop()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "job task terminated unexpectedly");
            }
        }
    }

    /// Run one cycle of each job sequentially and return. Operational
    /// debug mode.
    pub async fn run_once(&self) {
        for job in &self.jobs {
            job.run_cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HomefluxError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_next_delay() {
        assert_eq!(
            next_delay(Duration::from_secs(60), Duration::from_secs(12)),
            Duration::from_secs(48)
        );
        assert_eq!(
            next_delay(Duration::from_secs(60), Duration::from_secs(60)),
            Duration::ZERO
        );
        // Overrun: next cycle starts immediately, missed slots skipped.
        assert_eq!(
            next_delay(Duration::from_secs(60), Duration::from_secs(90)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_others() {
        let failing_attempts = Arc::new(AtomicUsize::new(0));
        let healthy_runs = Arc::new(AtomicUsize::new(0));

        let failing = {
            let attempts = failing_attempts.clone();
            Job::new("failing", Duration::from_millis(10), move || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(HomefluxError::connection("failing", "always down"))
                }
            })
        };
        let healthy = {
            let runs = healthy_runs.clone();
            Job::new("healthy", Duration::from_millis(10), move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
            })
        };

        let scheduler = tokio::spawn(Scheduler::new(vec![failing, healthy]).run_forever());
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.abort();

        // The failing job retries on its schedule instead of terminating,
        // and the healthy job is unaffected.
        assert!(failing_attempts.load(Ordering::SeqCst) >= 3);
        assert!(healthy_runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_run_once_runs_each_job_a_single_time() {
        let runs = Arc::new(AtomicUsize::new(0));

        let job = {
            let runs = runs.clone();
            Job::new("single", Duration::from_secs(3600), move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            })
        };

        Scheduler::new(vec![job]).run_once().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
