//! Drives discovery, accessory reconciliation and the periodic poll loop.

use crate::accessory_host::{AccessoryHost, RestoredAccessory};
use crate::config::SchedulerConfig;
use crate::discovery::{discover, DiscoveryResult};
use crate::error::FetchError;
use crate::history::HistoryRecorder;
use crate::homewizard_api::HomeWizardApi;
use crate::power_sensor::PowerSensor;
use crate::reconciler::{reconcile, AccessoryRecord, Intent};
use crate::sample_mapper::{self, MappedSample};
use crate::sensor::{SensorIdentity, SensorKind};
use anyhow::anyhow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started yet, or stopped
    Idle,
    Discovering,
    Reconciling,
    Polling,
    /// Discovery failed; nothing further happens until restart
    Failed,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Discovering => "discovering",
            SchedulerState::Reconciling => "reconciling",
            SchedulerState::Polling => "polling",
            SchedulerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Called after every successful cycle, once all sensors have been beaten.
pub type SampleObserver = Box<dyn Fn(&MappedSample) + Send + Sync>;

#[derive(Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_triggered(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Owns the poll timer. Cycles run one at a time on a single task.
pub struct PollScheduler {
    config: SchedulerConfig,
    api: HomeWizardApi,
    host: Arc<dyn AccessoryHost>,
    history: Arc<dyn HistoryRecorder>,
    on_sample: Option<SampleObserver>,
    state: watch::Sender<SchedulerState>,
}

impl PollScheduler {
    pub fn new(
        config: SchedulerConfig,
        host: Arc<dyn AccessoryHost>,
        history: Arc<dyn HistoryRecorder>,
    ) -> anyhow::Result<Self> {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            api: HomeWizardApi::new(config.request_timeout)?,
            config,
            host,
            history,
            on_sample: None,
            state,
        })
    }

    pub fn on_sample(mut self, observer: impl Fn(&MappedSample) + Send + Sync + 'static) -> Self {
        self.on_sample = Some(Box::new(observer));
        self
    }

    /// Spawns the scheduler on its own task
    pub fn spawn(self) -> SchedulerHandle {
        let stop = Arc::new(StopSignal::default());
        let state = self.state.subscribe();
        let task_stop = stop.clone();
        let task = tokio::spawn(async move {
            self.run(task_stop).await;
        });
        SchedulerHandle { state, stop, task }
    }

    async fn run(self, stop: Arc<StopSignal>) {
        info!(
            host = %self.config.host,
            interval_secs = self.config.poll_interval.as_secs_f64(),
            "starting meter poller"
        );

        self.set_state(SchedulerState::Discovering);
        let result = tokio::select! {
            biased;
            _ = stop.notify.notified() => None,
            result = discover(&self.api, &self.config.host) => Some(result),
        };
        let discovery = match result {
            Some(Ok(discovery)) => discovery,
            Some(Err(e)) => {
                error!(error = %e, "meter discovery failed, no sensors will be published");
                self.set_state(SchedulerState::Failed);
                return;
            }
            None => {
                info!("stopped during discovery");
                self.set_state(SchedulerState::Idle);
                return;
            }
        };

        if stop.is_triggered() {
            self.set_state(SchedulerState::Idle);
            return;
        }

        self.set_state(SchedulerState::Reconciling);
        let sensors = self.reconcile_accessories(&discovery);

        self.set_state(SchedulerState::Polling);
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.notify.notified() => break,
                _ = ticker.tick() => {}
            }
            if stop.is_triggered() {
                break;
            }
            // Awaited inline so a slow meter can never have two requests in flight
            let _ = self.run_cycle(&discovery, &sensors).await;
        }

        info!("meter poller stopped");
        self.set_state(SchedulerState::Idle);
    }

    fn set_state(&self, state: SchedulerState) {
        debug!(%state, "scheduler state");
        self.state.send_replace(state);
    }

    /// Executes the reconciliation intents and returns the sensors that will be beaten.
    fn reconcile_accessories(&self, discovery: &DiscoveryResult) -> Vec<PowerSensor> {
        let restored = self.host.restored_accessories();
        let records: Vec<AccessoryRecord> = SensorKind::ALL
            .into_iter()
            .map(SensorIdentity::for_kind)
            .filter(|identity| restored.iter().any(|a| a.uuid == identity.stable_id))
            .map(|identity| AccessoryRecord {
                identity,
                exists_in_host_store: true,
                is_enabled_by_config: self.config.desired_sensors.contains(&identity),
            })
            .collect();

        let mut sensors = Vec::new();
        for intent in reconcile(&self.config.desired_sensors, &records) {
            let kind = intent.identity().kind;
            match self.apply_intent(intent, discovery) {
                Ok(Some(sensor)) => sensors.push(sensor),
                Ok(None) => {}
                Err(e) => warn!(sensor = %kind, error = %e, "failed to apply accessory intent"),
            }
        }
        sensors
    }

    fn apply_intent(
        &self,
        intent: Intent,
        discovery: &DiscoveryResult,
    ) -> anyhow::Result<Option<PowerSensor>> {
        match intent {
            Intent::Create(identity) => {
                let name = identity.kind.display_name();
                let accessory = self.host.create_accessory(identity.stable_id, name);
                self.host.register_accessory(&accessory)?;
                info!("{name} added as accessory");
                self.attach(identity, &accessory, discovery).map(Some)
            }
            Intent::BindExisting(identity, _) => {
                let accessory = self
                    .host
                    .find_restored(&identity.stable_id)
                    .ok_or_else(|| anyhow!("restored accessory {} vanished", identity.stable_id))?;
                info!("{} restored from cache", accessory.display_name);
                self.attach(identity, &accessory, discovery).map(Some)
            }
            Intent::Remove(record) => {
                self.host
                    .unregister_accessory(&record.identity.stable_id)?;
                info!("{} removed", record.identity.kind.display_name());
                Ok(None)
            }
        }
    }

    fn attach(
        &self,
        identity: SensorIdentity,
        accessory: &RestoredAccessory,
        discovery: &DiscoveryResult,
    ) -> anyhow::Result<PowerSensor> {
        PowerSensor::attach(
            identity,
            accessory,
            discovery.device(),
            self.host.clone(),
            self.history.clone(),
        )
    }

    /// One fetch, map and dispatch. A failed fetch skips the whole cycle.
    async fn run_cycle(
        &self,
        discovery: &DiscoveryResult,
        sensors: &[PowerSensor],
    ) -> Result<MappedSample, FetchError> {
        let raw = match self.api.read_sample(&self.config.host, discovery).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "meter poll failed, skipping cycle");
                return Err(e);
            }
        };

        let mapped = sample_mapper::map(&raw);
        debug!(
            active_power_w = raw.active_power_w,
            import_w = mapped.import.instantaneous_w,
            export_w = mapped.export.instantaneous_w,
            "sample"
        );

        for sensor in sensors {
            sensor.beat(mapped.reading(sensor.kind()));
        }
        if let Some(observer) = &self.on_sample {
            observer(&mapped);
        }
        Ok(mapped)
    }
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    state: watch::Receiver<SchedulerState>,
    stop: Arc<StopSignal>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Waits until the scheduler reaches `target`, fails, or exits. Returns the state reached.
    pub async fn wait_for_state(&mut self, target: SchedulerState) -> SchedulerState {
        loop {
            let current = *self.state.borrow_and_update();
            if current == target || current == SchedulerState::Failed {
                return current;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the poll loop after any in-flight cycle and waits for the task to end.
    pub async fn stop(self) {
        self.stop.trigger();
        if let Err(e) = self.task.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}
