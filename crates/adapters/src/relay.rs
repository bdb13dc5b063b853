//! RelayAdapter - dual-role adapter re-publishing its inputs
//!
//! Every ingested measurement is re-emitted once per output key with the
//! same timestamp, value and quality.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use contracts::{
    ContractError, KeySet, Measurement, MeasurementHandler, MeasurementRef, MeasurementSink,
    MeasurementSource,
};

use crate::consumer::IngestHook;
use crate::macros::impl_adapter;
use crate::state::{AdapterSettings, AdapterState};

pub struct RelayAdapter {
    state: Arc<AdapterState>,
    subscribed: Option<KeySet>,
    produced: KeySet,
    handler: RwLock<Option<MeasurementHandler>>,
    hook: RwLock<Option<IngestHook>>,
}

impl RelayAdapter {
    pub fn new(name: &str, inputs: Option<KeySet>, outputs: KeySet, settings: AdapterSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(AdapterState::new(name, settings)),
            subscribed: inputs,
            produced: outputs,
            handler: RwLock::new(None),
            hook: RwLock::new(None),
        })
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    pub fn set_on_ingest(&self, hook: IngestHook) {
        *self.hook.write() = Some(hook);
    }

    /// Output keys currently re-published.
    fn outputs(&self) -> KeySet {
        match self.state.requested_output() {
            Some(requested) if self.state.settings().respect_output_demand => requested,
            _ => self.produced.clone(),
        }
    }

    fn on_enabled_changed(&self, _enabled: bool) {}
}

impl_adapter!(RelayAdapter);

impl MeasurementSource for RelayAdapter {
    fn set_new_measurements_handler(&self, handler: Option<MeasurementHandler>) {
        *self.handler.write() = handler;
    }
}

impl MeasurementSink for RelayAdapter {
    fn ingest(&self, batch: &[MeasurementRef]) -> Result<(), ContractError> {
        self.state.add_received(batch.len());
        if !self.state.is_enabled() {
            return Ok(());
        }

        let outputs = self.outputs();
        let handler = self.handler.read().clone();
        if let Some(handler) = handler.filter(|_| !outputs.is_empty()) {
            let relayed: Vec<MeasurementRef> = batch
                .iter()
                .flat_map(|m| {
                    outputs.iter().map(move |key| {
                        Measurement::at(key.clone(), m.timestamp, m.value)
                            .with_quality(m.quality)
                            .into_ref()
                    })
                })
                .collect();
            trace!(adapter = %self.state.id(), count = relayed.len(), "relaying batch");
            self.state.add_emitted(relayed.len());
            handler(relayed);
        }

        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(batch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{key_set, Adapter, SignalKey};
    use parking_lot::Mutex;

    #[test]
    fn test_relay_republishes_under_outputs() {
        let relay = RelayAdapter::new("R", Some(key_set(["IN"])), key_set(["OUT"]), AdapterSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay.set_new_measurements_handler(Some(Arc::new(move |batch: Vec<MeasurementRef>| {
            sink.lock().extend(batch)
        })));

        let input = Measurement::now(SignalKey::from_tag("IN"), 42.0).into_ref();
        relay.ingest(&[Arc::clone(&input)]).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, SignalKey::from_tag("OUT"));
        assert_eq!(seen[0].value, 42.0);
        assert_eq!(seen[0].timestamp, input.timestamp);
    }

    #[test]
    fn test_disabled_relay_emits_nothing() {
        let relay = RelayAdapter::new("R", None, key_set(["OUT"]), AdapterSettings::default().manual());
        assert!(!relay.enabled());
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        relay.set_new_measurements_handler(Some(Arc::new(move |batch: Vec<MeasurementRef>| {
            *sink.lock() += batch.len()
        })));

        relay
            .ingest(&[Measurement::now(SignalKey::from_tag("X"), 1.0).into_ref()])
            .unwrap();
        assert_eq!(*seen.lock(), 0);
        assert_eq!(relay.state().counters().received, 1);
    }
}
