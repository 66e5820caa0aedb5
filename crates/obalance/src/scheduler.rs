//! A small fixed-interval job scheduler.
//!
//! Single-threaded and cooperative: jobs run strictly one at a time on
//! the scheduler's own thread, so they never overlap each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::err::ConfigError;

/// A closure run on a fixed interval.
type JobFn = Box<dyn FnMut() + Send>;

/// One scheduled job.
struct Job {
    /// Name used in log messages.
    name: &'static str,
    /// How often the job runs.
    interval: Duration,
    /// When the job is next due.
    next_run: Instant,
    /// The work itself.
    func: JobFn,
}

impl Job {
    /// Run the job once and reschedule it.
    ///
    /// The next run is `interval` after the *previous scheduled* time,
    /// not after "now", so a slow job doesn't push the whole schedule
    /// later and later.
    fn run(&mut self) {
        debug!("Running job {}.", self.name);
        (self.func)();
        self.next_run += self.interval;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("next_run", &self.next_run)
            .finish_non_exhaustive()
    }
}

/// A list of jobs and the loop that runs them.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// The registered jobs.
    jobs: Vec<Job>,
}

impl Scheduler {
    /// Create a scheduler with no jobs.
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Register a job to run every `interval`, first due immediately.
    pub fn add_job(
        &mut self,
        name: &'static str,
        interval: Duration,
        func: impl FnMut() + Send + 'static,
    ) {
        self.jobs.push(Job {
            name,
            interval,
            next_run: Instant::now(),
            func: Box::new(func),
        });
    }

    /// True if no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job once, in registration order, sleeping `delay`
    /// between jobs to stagger their startup load. Each job is then
    /// rescheduled `interval` from its early run.
    pub fn run_all(&mut self, delay: Duration) {
        for job in &mut self.jobs {
            // The early run counts as the scheduled one.
            job.next_run = Instant::now();
            job.run();
            std::thread::sleep(delay);
        }
    }

    /// Run jobs until `shutdown` is set.
    ///
    /// Wakes every `tick`, runs all due jobs in ascending due-time
    /// order, and sleeps again. An empty job list is a configuration
    /// error, not an idle loop.
    pub fn run_forever(&mut self, tick: Duration, shutdown: &AtomicBool) -> Result<(), ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::NoJobs);
        }

        while !shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            let mut due: Vec<usize> = (0..self.jobs.len())
                .filter(|&i| self.jobs[i].next_run <= now)
                .collect();
            due.sort_by_key(|&i| self.jobs[i].next_run);
            for i in due {
                self.jobs[i].run();
            }
            std::thread::sleep(tick);
        }
        debug!("Scheduler loop stopping.");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn empty_scheduler_is_fatal() {
        let shutdown = AtomicBool::new(false);
        let mut scheduler = Scheduler::new();
        assert!(matches!(
            scheduler.run_forever(Duration::from_millis(1), &shutdown),
            Err(ConfigError::NoJobs)
        ));
    }

    #[test]
    fn run_all_runs_each_job_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        for name in ["a", "b", "c"] {
            let counter = Arc::clone(&counter);
            scheduler.add_job(name, Duration::from_secs(3600), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.run_all(Duration::ZERO);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn due_jobs_run_and_reschedule() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut scheduler = Scheduler::new();
        {
            let counter = Arc::clone(&counter);
            let shutdown = Arc::clone(&shutdown);
            scheduler.add_job("count", Duration::from_millis(5), move || {
                if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                    shutdown.store(true, Ordering::SeqCst);
                }
            });
        }

        scheduler
            .run_forever(Duration::from_millis(1), &shutdown)
            .unwrap();
        // The job was due immediately and then rescheduled on its
        // interval until it requested shutdown.
        assert!(counter.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let shutdown = AtomicBool::new(true);
        let mut scheduler = Scheduler::new();
        scheduler.add_job("never", Duration::from_secs(1), || {});
        // Pre-set shutdown: returns without running anything forever.
        scheduler
            .run_forever(Duration::from_millis(1), &shutdown)
            .unwrap();
    }
}
