//! Fixed-interval job scheduler: one thread, a short poll tick, and one job
//! per controller. A job's next run is measured from the end of its last
//! run, and the first run happens one full interval after startup.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

struct Job {
    name: &'static str,
    interval: Duration,
    next_run: Instant,
    action: Box<dyn FnMut() + Send>,
}

pub struct JobScheduler {
    jobs: Vec<Job>,
    tick: Duration,
}

impl JobScheduler {
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            tick,
        }
    }

    /// Register a job. Its first run is one `interval` from now.
    pub fn add_job(
        &mut self,
        name: &'static str,
        interval: Duration,
        action: impl FnMut() + Send + 'static,
    ) {
        self.jobs.push(Job {
            name,
            interval,
            next_run: Instant::now() + interval,
            action: Box::new(action),
        });
    }

    /// Run every job whose deadline has passed. Deadlines are re-armed from
    /// the moment the job finishes, so a slow run pushes the next one out
    /// rather than stacking up.
    pub fn run_pending(&mut self, now: Instant) -> Vec<&'static str> {
        let mut ran = Vec::new();
        for job in &mut self.jobs {
            if now >= job.next_run {
                (job.action)();
                job.next_run = Instant::now() + job.interval;
                ran.push(job.name);
            }
        }
        ran
    }

    /// Poll loop: check signals, service reload requests, run due jobs,
    /// sleep one tick. Returns when `should_stop` says so.
    pub fn run_loop(
        &mut self,
        mut should_stop: impl FnMut() -> bool,
        mut on_tick: impl FnMut(),
    ) {
        while !should_stop() {
            on_tick();
            self.run_pending(Instant::now());
            std::thread::sleep(self.tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn job_does_not_run_before_its_first_interval() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let mut scheduler = JobScheduler::new(Duration::from_millis(1));
        scheduler.add_job("archival", Duration::from_secs(3600), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.run_pending(Instant::now()).is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn due_job_runs_and_rearms() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let mut scheduler = JobScheduler::new(Duration::from_millis(1));
        scheduler.add_job("retention", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(10));
        let ran = scheduler.run_pending(Instant::now());
        assert_eq!(ran, vec!["retention"]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Immediately after running the deadline is re-armed.
        assert!(scheduler.run_pending(Instant::now()).is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loop_stops_when_asked() {
        let mut scheduler = JobScheduler::new(Duration::from_millis(1));
        let mut ticks = 0;
        scheduler.run_loop(
            move || {
                ticks += 1;
                ticks > 3
            },
            || {},
        );
    }
}
