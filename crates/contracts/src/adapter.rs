//! Adapter capability contract
//!
//! The routing engine never implements producers or consumers itself. It sees
//! them through the [`Adapter`] trait plus one or both of the role capabilities
//! ([`MeasurementSource`], [`MeasurementSink`]), bound together once at
//! registration time by [`AdapterRegistration`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::{AdapterId, ContractError, KeySet, MeasurementRef};

/// Producer-side callback the engine installs on every producer.
pub type MeasurementHandler = Arc<dyn Fn(Vec<MeasurementRef>) + Send + Sync>;

/// Common adapter surface read by the routing engine and the demand controller.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// interior mutability since the engine shares adapters across threads.
pub trait Adapter: Send + Sync {
    fn id(&self) -> &AdapterId;

    /// Keys this adapter wants to receive. `None` subscribes to everything.
    fn subscribed_keys(&self) -> Option<KeySet>;

    /// Keys this adapter publishes.
    fn produced_keys(&self) -> KeySet;

    fn enabled(&self) -> bool;

    /// Start or stop the adapter. Must tolerate redundant calls.
    fn set_enabled(&self, enabled: bool);

    /// Adapters that do not auto-start are managed by connect-on-demand.
    fn auto_start(&self) -> bool {
        true
    }

    fn respect_input_demand(&self) -> bool {
        false
    }

    fn respect_output_demand(&self) -> bool {
        false
    }

    /// Names of adapters that must process a measurement before this one sees it.
    fn dependency_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// How long a gated measurement may wait. `None` disables gating.
    fn dependency_timeout(&self) -> Option<Duration> {
        None
    }

    fn requested_input_keys(&self) -> Option<KeySet>;

    fn set_requested_input_keys(&self, keys: Option<KeySet>);

    fn requested_output_keys(&self) -> Option<KeySet>;

    fn set_requested_output_keys(&self, keys: Option<KeySet>);
}

/// Consumer capability: batched ingestion entry point.
pub trait MeasurementSink: Send + Sync {
    /// Process one batch. Called by a single drain worker at a time and must
    /// not block indefinitely.
    fn ingest(&self, batch: &[MeasurementRef]) -> Result<(), ContractError>;
}

/// Producer capability: the engine subscribes to new measurements here.
pub trait MeasurementSource: Send + Sync {
    /// Install or (with `None`) remove the new-measurements handler.
    fn set_new_measurements_handler(&self, handler: Option<MeasurementHandler>);
}

/// Role tag of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Producer,
    Consumer,
    Both,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::Both => "both",
        })
    }
}

/// Role together with the capabilities that role carries.
#[derive(Clone)]
pub enum AdapterRole {
    Producer {
        source: Arc<dyn MeasurementSource>,
    },
    Consumer {
        sink: Arc<dyn MeasurementSink>,
    },
    Both {
        source: Arc<dyn MeasurementSource>,
        sink: Arc<dyn MeasurementSink>,
    },
}

impl AdapterRole {
    pub fn kind(&self) -> RoleKind {
        match self {
            Self::Producer { .. } => RoleKind::Producer,
            Self::Consumer { .. } => RoleKind::Consumer,
            Self::Both { .. } => RoleKind::Both,
        }
    }

    pub fn source(&self) -> Option<&Arc<dyn MeasurementSource>> {
        match self {
            Self::Producer { source } | Self::Both { source, .. } => Some(source),
            Self::Consumer { .. } => None,
        }
    }

    pub fn sink(&self) -> Option<&Arc<dyn MeasurementSink>> {
        match self {
            Self::Consumer { sink } | Self::Both { sink, .. } => Some(sink),
            Self::Producer { .. } => None,
        }
    }
}

impl fmt::Debug for AdapterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdapterRole::{:?}", self.kind())
    }
}

/// An adapter bound to its role, as handed to the routing engine.
#[derive(Clone)]
pub struct AdapterRegistration {
    pub adapter: Arc<dyn Adapter>,
    pub role: AdapterRole,
}

impl AdapterRegistration {
    pub fn producer<T>(adapter: Arc<T>) -> Self
    where
        T: Adapter + MeasurementSource + 'static,
    {
        Self {
            role: AdapterRole::Producer {
                source: adapter.clone(),
            },
            adapter,
        }
    }

    pub fn consumer<T>(adapter: Arc<T>) -> Self
    where
        T: Adapter + MeasurementSink + 'static,
    {
        Self {
            role: AdapterRole::Consumer {
                sink: adapter.clone(),
            },
            adapter,
        }
    }

    /// Dual-role (action) adapter.
    pub fn action<T>(adapter: Arc<T>) -> Self
    where
        T: Adapter + MeasurementSource + MeasurementSink + 'static,
    {
        Self {
            role: AdapterRole::Both {
                source: adapter.clone(),
                sink: adapter.clone(),
            },
            adapter,
        }
    }

    pub fn id(&self) -> &AdapterId {
        self.adapter.id()
    }

    pub fn kind(&self) -> RoleKind {
        self.role.kind()
    }

    pub fn is_producer(&self) -> bool {
        self.role.source().is_some()
    }

    pub fn is_consumer(&self) -> bool {
        self.role.sink().is_some()
    }

    /// Point-in-time view of the adapter's routing-relevant state.
    pub fn describe(&self) -> AdapterDescriptor {
        let adapter = &self.adapter;
        AdapterDescriptor {
            id: adapter.id().clone(),
            role: self.kind(),
            subscribed_keys: adapter.subscribed_keys(),
            produced_keys: adapter.produced_keys(),
            enabled: adapter.enabled(),
            auto_start: adapter.auto_start(),
            respect_input_demand: adapter.respect_input_demand(),
            respect_output_demand: adapter.respect_output_demand(),
            dependency_timeout: adapter.dependency_timeout(),
            dependencies: adapter
                .dependency_names()
                .into_iter()
                .map(AdapterId::from)
                .collect(),
            requested_input_keys: adapter.requested_input_keys(),
            requested_output_keys: adapter.requested_output_keys(),
        }
    }
}

impl fmt::Debug for AdapterRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistration")
            .field("id", self.id())
            .field("role", &self.kind())
            .finish()
    }
}

/// Routing engine's read-only view of one participant.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterDescriptor {
    pub id: AdapterId,
    pub role: RoleKind,
    pub subscribed_keys: Option<KeySet>,
    pub produced_keys: KeySet,
    pub enabled: bool,
    pub auto_start: bool,
    pub respect_input_demand: bool,
    pub respect_output_demand: bool,
    pub dependency_timeout: Option<Duration>,
    pub dependencies: Vec<AdapterId>,
    pub requested_input_keys: Option<KeySet>,
    pub requested_output_keys: Option<KeySet>,
}

/// Split a `dependencies` setting into adapter names.
///
/// Accepts `,` and `;` as separators, trims whitespace, drops empty entries and
/// repeats while keeping first-seen order.
pub fn parse_dependency_names(setting: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    setting
        .split([',', ';'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(*name))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use crate::key_set;

    struct Probe {
        id: AdapterId,
        enabled: AtomicBool,
        requested: Mutex<Option<KeySet>>,
    }

    impl Probe {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: name.into(),
                enabled: AtomicBool::new(true),
                requested: Mutex::new(None),
            })
        }
    }

    impl Adapter for Probe {
        fn id(&self) -> &AdapterId {
            &self.id
        }
        fn subscribed_keys(&self) -> Option<KeySet> {
            Some(key_set(["A"]))
        }
        fn produced_keys(&self) -> KeySet {
            key_set(["B"])
        }
        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn dependency_names(&self) -> Vec<String> {
            parse_dependency_names("archive; calc")
        }
        fn requested_input_keys(&self) -> Option<KeySet> {
            self.requested.lock().unwrap().clone()
        }
        fn set_requested_input_keys(&self, keys: Option<KeySet>) {
            *self.requested.lock().unwrap() = keys;
        }
        fn requested_output_keys(&self) -> Option<KeySet> {
            None
        }
        fn set_requested_output_keys(&self, _keys: Option<KeySet>) {}
    }

    impl MeasurementSink for Probe {
        fn ingest(&self, _batch: &[MeasurementRef]) -> Result<(), ContractError> {
            Ok(())
        }
    }

    impl MeasurementSource for Probe {
        fn set_new_measurements_handler(&self, _handler: Option<MeasurementHandler>) {}
    }

    #[test]
    fn test_parse_dependency_names() {
        assert_eq!(
            parse_dependency_names(" a, b;c ,, a ;"),
            vec!["a".to_string(), "b".into(), "c".into()]
        );
        assert!(parse_dependency_names("").is_empty());
        assert!(parse_dependency_names(" ; , ").is_empty());
    }

    #[test]
    fn test_registration_roles() {
        let probe = Probe::new("relay");
        let action = AdapterRegistration::action(probe.clone());
        assert_eq!(action.kind(), RoleKind::Both);
        assert!(action.is_producer() && action.is_consumer());

        let consumer = AdapterRegistration::consumer(probe.clone());
        assert!(!consumer.is_producer());
        assert_eq!(consumer.id(), "relay");

        let producer = AdapterRegistration::producer(probe);
        assert!(producer.role.sink().is_none());
    }

    #[test]
    fn test_describe_snapshots_state() {
        let probe = Probe::new("calc");
        probe.set_requested_input_keys(Some(KeySet::new()));
        let desc = AdapterRegistration::consumer(probe).describe();
        assert_eq!(desc.role, RoleKind::Consumer);
        assert_eq!(desc.dependencies, vec![AdapterId::from("archive"), "calc".into()]);
        assert_eq!(desc.requested_input_keys, Some(KeySet::new()));
        assert!(desc.auto_start);
        assert!(desc.dependency_timeout.is_none());
    }
}
