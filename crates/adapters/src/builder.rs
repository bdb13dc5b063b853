//! Build reference adapters from blueprint configuration

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;

use contracts::{key_set, AdapterConfig, AdapterKind, AdapterRegistration, ContractError, KeySet};

use crate::consumer::{IngestHook, LogConsumer};
use crate::producer::SyntheticProducer;
use crate::relay::RelayAdapter;
use crate::state::{AdapterSettings, AdapterState};

/// An adapter built from configuration.
pub enum BuiltAdapter {
    Producer(Arc<SyntheticProducer>),
    Consumer(Arc<LogConsumer>),
    Relay(Arc<RelayAdapter>),
}

impl BuiltAdapter {
    pub fn registration(&self) -> AdapterRegistration {
        match self {
            Self::Producer(p) => AdapterRegistration::producer(Arc::clone(p)),
            Self::Consumer(c) => AdapterRegistration::consumer(Arc::clone(c)),
            Self::Relay(r) => AdapterRegistration::action(Arc::clone(r)),
        }
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        match self {
            Self::Producer(p) => p.state(),
            Self::Consumer(c) => c.state(),
            Self::Relay(r) => r.state(),
        }
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::Producer(_) => AdapterKind::Producer,
            Self::Consumer(_) => AdapterKind::Consumer,
            Self::Relay(_) => AdapterKind::Relay,
        }
    }

    /// Install a post-ingest hook; producers have no ingest and ignore it.
    pub fn set_on_ingest(&self, hook: IngestHook) {
        match self {
            Self::Producer(_) => {}
            Self::Consumer(c) => c.set_on_ingest(hook),
            Self::Relay(r) => r.set_on_ingest(hook),
        }
    }
}

fn keys(tags: &[String]) -> KeySet {
    key_set(tags.iter().map(String::as_str))
}

/// Build one adapter. Producers are spawned on `runtime`.
pub fn build_adapter(config: &AdapterConfig, runtime: &Handle) -> Result<BuiltAdapter, ContractError> {
    let settings = AdapterSettings::from(config);
    let inputs = config.inputs.as_deref().map(keys);
    let outputs = keys(&config.outputs);
    let field = |name: &str| format!("adapters[{}].{name}", config.name);

    let built = match config.kind {
        AdapterKind::Producer => {
            let rate_hz = config
                .rate_hz
                .ok_or_else(|| ContractError::config_validation(field("rate_hz"), "required for producers"))?;
            if outputs.is_empty() {
                return Err(ContractError::config_validation(field("outputs"), "producer has no outputs"));
            }
            BuiltAdapter::Producer(SyntheticProducer::new(
                &config.name,
                outputs,
                rate_hz,
                settings,
                runtime.clone(),
            )?)
        }
        AdapterKind::Consumer => {
            let consumer = LogConsumer::new(&config.name, inputs, settings);
            if let Some(delay) = config.ingest_delay_ms {
                consumer.set_ingest_delay(Duration::from_millis(delay));
            }
            BuiltAdapter::Consumer(consumer)
        }
        AdapterKind::Relay => {
            if outputs.is_empty() {
                return Err(ContractError::config_validation(field("outputs"), "relay has no outputs"));
            }
            BuiltAdapter::Relay(RelayAdapter::new(&config.name, inputs, outputs, settings))
        }
    };
    Ok(built)
}

/// Build every configured adapter, failing on the first invalid one.
pub fn build_topology(configs: &[AdapterConfig], runtime: &Handle) -> Result<Vec<BuiltAdapter>, ContractError> {
    let built = configs
        .iter()
        .map(|config| build_adapter(config, runtime))
        .collect::<Result<Vec<_>, _>>()?;
    info!(adapters = built.len(), "Synthetic topology built");
    Ok(built)
}
