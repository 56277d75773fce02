//! Periodic job scheduler
//!
//! `main` builds one [`Scheduler`], registers the periodic work and keeps the
//! returned [`SchedulerHandle`] for shutdown. Each job gets its own interval
//! loop; a failed run is logged and the next tick runs as usual.

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn run(&self) -> Result<()>;
}

struct Registration {
    name: String,
    interval: Duration,
    job: Arc<dyn ScheduledJob>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Registration>,
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        job: Arc<dyn ScheduledJob>,
    ) -> &mut Self {
        self.jobs.push(Registration {
            name: name.into(),
            interval,
            job,
        });
        self
    }

    /// Spawn one loop per registered job. The first run happens immediately.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let tasks = self
            .jobs
            .into_iter()
            .map(|registration| {
                let cancel = cancel.clone();
                tokio::spawn(run_loop(registration, cancel))
            })
            .collect();
        SchedulerHandle { cancel, tasks }
    }
}

async fn run_loop(registration: Registration, cancel: CancellationToken) {
    let Registration {
        name,
        interval,
        job,
    } = registration;
    tracing::info!(job = %name, interval_secs = interval.as_secs(), "Scheduled job started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tracing::debug!(job = %name, "Running scheduled job");
                if let Err(e) = job.run().await {
                    tracing::error!(job = %name, error = %format!("{:#}", e), "Scheduled job failed");
                }
            }
        }
    }

    tracing::info!(job = %name, "Scheduled job stopped");
}

impl SchedulerHandle {
    /// Stop every loop and wait for any run in progress to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduled job task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ScheduledJob for Counter {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("sweep failed");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_each_job_on_its_interval() {
        let fast = Arc::new(Counter::default());
        let slow = Arc::new(Counter::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .register("fast", Duration::from_secs(10), fast.clone())
            .register("slow", Duration::from_secs(60), slow.clone());
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_secs(65)).await;
        handle.shutdown().await;

        // Immediate first tick, then one per interval.
        assert_eq!(fast.runs.load(Ordering::SeqCst), 7);
        assert_eq!(slow.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_does_not_stop_the_loop() {
        let failing = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let mut scheduler = Scheduler::new();
        scheduler.register("failing", Duration::from_secs(1), failing.clone());
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        handle.shutdown().await;

        assert_eq!(failing.runs.load(Ordering::SeqCst), 4);
    }
}
