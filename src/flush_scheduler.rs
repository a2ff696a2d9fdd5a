use crate::change_sensor::SensorEvent;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Unarmed,
    WaitingFirstTick,
    Recurring,
}

/// Timer task that enqueues a `Tick` once at the first aligned flush instant
/// and then once per period.
pub struct FlushScheduler {
    first_delay: Duration,
    period: Duration,
    ticks: Sender<SensorEvent>,
    phase: watch::Sender<SchedulerPhase>,
}

/// Owns the running timer task. Dropping the handle cancels the timer.
pub struct FlushSchedulerHandle {
    task: JoinHandle<()>,
    phase: watch::Receiver<SchedulerPhase>,
}

impl FlushScheduler {
    pub fn new(first_delay: Duration, period: Duration, ticks: Sender<SensorEvent>) -> Self {
        let (phase, _) = watch::channel(SchedulerPhase::Unarmed);
        Self {
            first_delay,
            period,
            ticks,
            phase,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Spawns the timer in its own task
    pub fn spawn(self) -> FlushSchedulerHandle {
        let phase = self.phase.subscribe();
        let task = tokio::spawn(async move {
            self.run().await;
        });
        FlushSchedulerHandle { task, phase }
    }

    async fn run(self) {
        info!(
            "Arming first flush in {:?}, then every {:?}",
            self.first_delay, self.period
        );
        self.phase.send_replace(SchedulerPhase::WaitingFirstTick);
        sleep(self.first_delay).await;

        if self.ticks.send(SensorEvent::Tick).await.is_err() {
            debug!("Sensor queue closed before the first flush");
            return;
        }

        self.phase.send_replace(SchedulerPhase::Recurring);
        let mut recurring = interval_at(Instant::now() + self.period, self.period);
        // A late tick still flushes once; missed periods are not replayed
        recurring.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            recurring.tick().await;
            if self.ticks.send(SensorEvent::Tick).await.is_err() {
                debug!("Sensor queue closed, stopping flush timer");
                break;
            }
        }
    }
}

impl FlushSchedulerHandle {
    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Stops the timer; no tick is enqueued after this returns.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for FlushSchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
