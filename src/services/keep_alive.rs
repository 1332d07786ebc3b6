//! Keep-alive scheduler
//!
//! A single timer-driven task evaluates registered jobs on a fixed tick and
//! runs whichever are due. A failing job is logged and rescheduled; it never
//! stops the loop.

use crate::catalog::CatalogSeeder;
use crate::services::channel::SubscriptionHandle;
use crate::services::quote::announce_supported_lines;
use crate::session::SessionManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A periodic maintenance job
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

struct Job {
    every: Duration,
    next_due: Instant,
    task: Arc<dyn MaintenanceTask>,
}

pub struct KeepAliveScheduler {
    tick: Duration,
    jobs: Vec<Job>,
}

impl KeepAliveScheduler {
    pub fn new(tick: Duration) -> Self {
        Self { tick, jobs: Vec::new() }
    }

    /// Run `task` every `every`, first one interval from now
    pub fn every(mut self, every: Duration, task: Arc<dyn MaintenanceTask>) -> Self {
        self.jobs.push(Job {
            every,
            next_due: Instant::now() + every,
            task,
        });
        self
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Run every job that is due, in registration order
    pub async fn run_pending(&mut self) {
        let now = Instant::now();
        for job in self.jobs.iter_mut().filter(|job| job.next_due <= now) {
            debug!("[KeepAlive] Running {}", job.task.name());
            if let Err(e) = job.task.run().await {
                warn!("[KeepAlive] {} failed: {:#}", job.task.name(), e);
            }
            job.next_due = now + job.every;
        }
    }

    /// Spawn the tick loop for the remaining lifetime of the process
    pub fn start(mut self) -> JoinHandle<()> {
        info!(
            "[KeepAlive] Started with {} jobs, tick {:?}",
            self.jobs.len(),
            self.tick
        );
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.run_pending().await;
            }
        })
    }
}

/// Asks the channel subscriber to re-handshake once per new session,
/// whichever code path rotated it
pub struct RotationSignal {
    sessions: Arc<SessionManager>,
    subscription: SubscriptionHandle,
    seen: AtomicU64,
}

impl RotationSignal {
    pub fn new(sessions: Arc<SessionManager>, subscription: SubscriptionHandle) -> Arc<Self> {
        let seen = AtomicU64::new(sessions.generation());
        Arc::new(Self {
            sessions,
            subscription,
            seen,
        })
    }

    /// Returns whether a re-handshake was requested
    pub fn publish(&self) -> bool {
        let generation = self.sessions.generation();
        if self.seen.swap(generation, Ordering::SeqCst) == generation {
            return false;
        }
        // the live channels were authorized with the previous access token
        self.subscription.request_resubscribe();
        true
    }
}

/// Rotates the session on a fixed interval
pub struct SessionRefreshTask {
    sessions: Arc<SessionManager>,
    signal: Arc<RotationSignal>,
}

impl SessionRefreshTask {
    pub fn new(sessions: Arc<SessionManager>, signal: Arc<RotationSignal>) -> Self {
        Self { sessions, signal }
    }
}

#[async_trait]
impl MaintenanceTask for SessionRefreshTask {
    fn name(&self) -> &str {
        "session refresh"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.sessions.refresh().await?;
        self.signal.publish();
        Ok(())
    }
}

/// Rotates an access token that expired ahead of the refresh interval
pub struct SessionExpiryTask {
    sessions: Arc<SessionManager>,
    signal: Arc<RotationSignal>,
}

impl SessionExpiryTask {
    pub fn new(sessions: Arc<SessionManager>, signal: Arc<RotationSignal>) -> Self {
        Self { sessions, signal }
    }
}

#[async_trait]
impl MaintenanceTask for SessionExpiryTask {
    fn name(&self) -> &str {
        "session expiry"
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.sessions.ensure_fresh().await?;
        if self.signal.publish() {
            info!("[KeepAlive] Session rotated, re-subscribing channels");
        }
        Ok(())
    }
}

/// Re-seeds the catalog and re-announces the supported lines
pub struct ReseedTask {
    seeder: Arc<CatalogSeeder>,
    sessions: Arc<SessionManager>,
}

impl ReseedTask {
    pub fn new(seeder: Arc<CatalogSeeder>, sessions: Arc<SessionManager>) -> Self {
        Self { seeder, sessions }
    }
}

#[async_trait]
impl MaintenanceTask for ReseedTask {
    fn name(&self) -> &str {
        "catalog reseed"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let catalog = self.seeder.seed().await?;
        announce_supported_lines(&self.sessions, &catalog).await;
        Ok(())
    }
}
