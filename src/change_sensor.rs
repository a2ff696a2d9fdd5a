use crate::alignment::{self, Clock};
use crate::config::{SensorConfig, SourceRoles};
use crate::flush_scheduler::{FlushScheduler, FlushSchedulerHandle, SchedulerPhase};
use crate::reading::{parse_gate, Reading};
use crate::state_store::StateStore;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Unit shown instead of the learned one once sources disagree.
pub const UNIT_MISMATCH: &str = "ERR";

const EVENT_QUEUE_SIZE: usize = 64;
const LAST_UPDATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Everything the sensor reacts to. All of it goes through one queue so value
/// updates, gate edges and flushes never interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    ValueChanged {
        source_id: String,
        raw: Option<String>,
        unit: Option<String>,
    },
    GateChanged {
        source_id: String,
        raw: Option<String>,
    },
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportedAttributes {
    pub delta: Reading,
    pub accu: Reading,
    pub prev_value: Reading,
    pub last_update: String,
}

/// State published to the host after every processed event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedState {
    pub name: String,
    pub value: Reading,
    pub unit: Option<String>,
    pub attributes: ReportedAttributes,
}

/// Unit of measurement learned from the tracked source.
#[derive(Debug, Default)]
struct UnitTracker {
    unit: Option<String>,
    mismatch: bool,
}

impl UnitTracker {
    fn observe(&mut self, unit: Option<&str>) {
        let Some(unit) = unit else { return };
        match &self.unit {
            None => self.unit = Some(unit.to_string()),
            Some(known) => {
                let mismatch = known != unit;
                if mismatch && !self.mismatch {
                    warn!("Unit '{unit}' does not match learned unit '{known}'");
                }
                self.mismatch = mismatch;
            }
        }
    }

    fn display(&self) -> Option<String> {
        if self.mismatch {
            Some(UNIT_MISMATCH.to_string())
        } else {
            self.unit.clone()
        }
    }
}

/// The change sensor: owns the state store and applies events to it one at a time.
pub struct ChangeSensor<C: Clock> {
    name: String,
    roles: SourceRoles,
    timespan: Duration,
    store: StateStore,
    units: UnitTracker,
    clock: C,
    publisher: Sender<ReportedState>,
}

/// Running sensor. Shut it down with [`ChangeSensorHandle::shutdown`]; dropping it
/// also stops the timer and the event loop.
pub struct ChangeSensorHandle {
    events: Sender<SensorEvent>,
    scheduler: FlushSchedulerHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl<C: Clock> ChangeSensor<C> {
    pub fn new(config: &SensorConfig, clock: C, publisher: Sender<ReportedState>) -> Self {
        let store = StateStore::new(config.roles.gate.is_some(), config.round_digits, clock.now());
        Self {
            name: config.name.clone(),
            roles: config.roles.clone(),
            timespan: config.timespan,
            store,
            units: UnitTracker::default(),
            clock,
            publisher,
        }
    }

    /// Applies one event to the store. Returns the state to publish, or `None`
    /// when the event came from a source this sensor does not track.
    pub fn handle_event(&mut self, event: SensorEvent) -> Option<ReportedState> {
        match event {
            SensorEvent::ValueChanged {
                source_id,
                raw,
                unit,
            } => {
                if source_id != self.roles.value {
                    debug!("Ignoring value update from untracked source {source_id}");
                    return None;
                }
                let value = Reading::parse(raw.as_deref());
                if !value.is_known() {
                    debug!("{source_id} reported non-numeric state {raw:?}, treating as unknown");
                }
                self.units.observe(unit.as_deref());
                self.store.on_value_changed(value);
            }
            SensorEvent::GateChanged { source_id, raw } => {
                if self.roles.gate.as_deref() != Some(source_id.as_str()) {
                    debug!("Ignoring gate update from untracked source {source_id}");
                    return None;
                }
                let gate = parse_gate(raw.as_deref());
                if gate.is_none() {
                    debug!("{source_id} reported state {raw:?}, gate is unknown");
                }
                self.store.on_gate_changed(gate);
            }
            SensorEvent::Tick => {
                self.store.begin_flush();
                self.store.on_flush(self.clock.now());
                info!(
                    "{} flushed, reporting {}",
                    self.name,
                    self.store.snapshot().reported_delta
                );
            }
        }
        Some(self.reported_state())
    }

    pub fn reported_state(&self) -> ReportedState {
        let snapshot = self.store.snapshot();
        ReportedState {
            name: self.name.clone(),
            value: snapshot.reported_delta,
            unit: self.units.display(),
            attributes: ReportedAttributes {
                delta: snapshot.reported_delta,
                accu: snapshot.accumulator,
                prev_value: snapshot.previous_baseline,
                last_update: snapshot
                    .last_flush_time
                    .format(LAST_UPDATE_FORMAT)
                    .to_string(),
            },
        }
    }

    /// Starts the event loop and arms the flush timer for the next aligned boundary.
    pub fn spawn(self) -> ChangeSensorHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let now = self.clock.now();
        let first_flush = alignment::first_flush(now, self.timespan);
        info!("{} starting, first flush at {first_flush}", self.name);
        let scheduler = FlushScheduler::new(
            alignment::until(now, first_flush),
            self.timespan,
            events_tx.clone(),
        )
        .spawn();

        let task = tokio::spawn(async move {
            self.run(events_rx, shutdown_rx).await;
        });

        ChangeSensorHandle {
            events: events_tx,
            scheduler,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(mut self, mut events: Receiver<SensorEvent>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                // Teardown wins over anything still queued
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Some(state) = self.handle_event(event) {
                        if let Err(e) = self.publisher.send(state).await {
                            warn!("Failed to publish sensor state: {e}");
                        }
                    }
                }
            }
        }
        info!("{} stopped", self.name);
    }
}

impl ChangeSensorHandle {
    /// Sender for value and gate notifications.
    pub fn events(&self) -> Sender<SensorEvent> {
        self.events.clone()
    }

    pub fn scheduler_phase(&self) -> SchedulerPhase {
        self.scheduler.phase()
    }

    /// Cancels the flush timer and stops the event loop. No flush happens afterwards.
    pub async fn shutdown(mut self) {
        self.scheduler.cancel();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("Change sensor task ended abnormally: {e}");
        }
    }
}
