//! Producer adapters
//!
//! - [`ManualProducer`]: emits whatever the caller hands it
//! - [`SyntheticProducer`]: tokio task generating values at a fixed rate

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use contracts::{ContractError, KeySet, Measurement, MeasurementHandler, MeasurementRef, MeasurementSource};

use crate::macros::impl_adapter;
use crate::state::{AdapterSettings, AdapterState};

type HandlerSlot = Arc<RwLock<Option<MeasurementHandler>>>;

/// Producer driven by explicit [`emit`](Self::emit) calls.
pub struct ManualProducer {
    state: Arc<AdapterState>,
    subscribed: Option<KeySet>,
    produced: KeySet,
    handler: HandlerSlot,
}

impl ManualProducer {
    pub fn new(name: &str, produced: KeySet) -> Arc<Self> {
        Self::with_settings(name, produced, AdapterSettings::default())
    }

    pub fn with_settings(name: &str, produced: KeySet, settings: AdapterSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(AdapterState::new(name, settings)),
            subscribed: None,
            produced,
            handler: Arc::new(RwLock::new(None)),
        })
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    /// Whether the engine has installed its handler.
    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Hand `batch` to the installed handler; false if none is installed.
    pub fn emit(&self, batch: Vec<MeasurementRef>) -> bool {
        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => {
                self.state.add_emitted(batch.len());
                handler(batch);
                true
            }
            None => false,
        }
    }

    fn on_enabled_changed(&self, _enabled: bool) {}
}

impl_adapter!(ManualProducer);

impl MeasurementSource for ManualProducer {
    fn set_new_measurements_handler(&self, handler: Option<MeasurementHandler>) {
        *self.handler.write() = handler;
    }
}

/// Producer generating one measurement per output key every period.
///
/// Generation runs only while enabled. With `respect_output_demand` set and
/// requested output keys present, only the requested keys are generated.
pub struct SyntheticProducer {
    state: Arc<AdapterState>,
    subscribed: Option<KeySet>,
    produced: KeySet,
    handler: HandlerSlot,
    period: Duration,
    epoch: Arc<AtomicU64>,
    runtime: Handle,
}

impl SyntheticProducer {
    /// Fails unless `rate_hz` is finite, positive and yields a non-zero period.
    pub fn new(
        name: &str,
        produced: KeySet,
        rate_hz: f64,
        settings: AdapterSettings,
        runtime: Handle,
    ) -> Result<Arc<Self>, ContractError> {
        let period = period_for(rate_hz).ok_or_else(|| {
            ContractError::config_validation(
                format!("adapters[{name}].rate_hz"),
                format!("must be a finite rate > 0, got {rate_hz}"),
            )
        })?;
        let producer = Arc::new(Self {
            state: Arc::new(AdapterState::new(name, settings)),
            subscribed: None,
            produced,
            handler: Arc::new(RwLock::new(None)),
            period,
            epoch: Arc::new(AtomicU64::new(0)),
            runtime,
        });
        if producer.state.is_enabled() {
            producer.start();
        }
        Ok(producer)
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn on_enabled_changed(&self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    fn start(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let generator = Generator {
            state: Arc::clone(&self.state),
            produced: self.produced.clone(),
            handler: Arc::clone(&self.handler),
            epoch: Arc::clone(&self.epoch),
        };
        debug!(adapter = %self.state.id(), period_ms = self.period.as_millis() as u64, "synthetic producer started");
        self.runtime.spawn(generator.run(epoch, self.period));
    }

    fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(adapter = %self.state.id(), "synthetic producer stopped");
    }
}

impl_adapter!(SyntheticProducer);

impl MeasurementSource for SyntheticProducer {
    fn set_new_measurements_handler(&self, handler: Option<MeasurementHandler>) {
        *self.handler.write() = handler;
    }
}

impl Drop for SyntheticProducer {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

struct Generator {
    state: Arc<AdapterState>,
    produced: KeySet,
    handler: HandlerSlot,
    epoch: Arc<AtomicU64>,
}

impl Generator {
    async fn run(self, epoch: u64, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            interval.tick().await;
            if self.epoch.load(Ordering::Acquire) != epoch || !self.state.is_enabled() {
                break;
            }
            let handler = self.handler.read().clone();
            let Some(handler) = handler else {
                continue;
            };

            let keys = match self.state.requested_output() {
                Some(requested) if self.state.settings().respect_output_demand => requested,
                _ => self.produced.clone(),
            };
            let now = Utc::now();
            let batch: Vec<MeasurementRef> = keys
                .into_iter()
                .map(|key| {
                    let value = synthetic_value(key.id().as_u128(), tick);
                    Measurement::at(key, now, value).into_ref()
                })
                .collect();

            trace!(adapter = %self.state.id(), count = batch.len(), tick, "synthetic batch");
            self.state.add_emitted(batch.len());
            handler(batch);
            tick += 1;
        }
    }
}

fn period_for(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(rate_hz.recip())
        .ok()
        .filter(|period| !period.is_zero())
}

/// Slow sine around 60 with a per-key phase.
fn synthetic_value(seed: u128, tick: u64) -> f64 {
    let phase = (seed % 360) as f64;
    60.0 + ((tick as f64 * 0.1) + phase.to_radians()).sin()
}
