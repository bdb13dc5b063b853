//! Connect-on-demand controller
//!
//! Planning is a pure function of adapter descriptors; applying the plan is
//! the only step that touches adapters. Only adapters with `auto_start ==
//! false` are managed.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, trace};

use contracts::{AdapterDescriptor, AdapterId, AdapterRegistration, KeySet, RoleKind};

/// What the controller decided for one demand-managed adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandDecision {
    pub id: AdapterId,
    pub role: RoleKind,
    pub enable: bool,
    pub requested_input: Option<KeySet>,
    pub requested_output: Option<KeySet>,
    /// Whether `requested_input` is written back to the adapter
    pub write_input: bool,
    /// Whether `requested_output` is written back to the adapter
    pub write_output: bool,
}

/// Demand computed for one topology.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DemandPlan {
    /// Keys some active adapter produces
    pub demanded_outputs: KeySet,
    /// Keys some active adapter wants to receive
    pub demanded_inputs: KeySet,
    pub decisions: Vec<DemandDecision>,
    pub restricted: bool,
}

impl DemandPlan {
    pub fn decision(&self, id: &str) -> Option<&DemandDecision> {
        self.decisions.iter().find(|d| d.id == id)
    }

    pub fn enabled_count(&self) -> usize {
        self.decisions.iter().filter(|d| d.enable).count()
    }
}

/// What [`DemandController::apply`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DemandOutcome {
    pub started: usize,
    pub stopped: usize,
    pub keys_updated: usize,
}

pub struct DemandController;

impl DemandController {
    /// Compute requested keys and enablement for every managed adapter.
    ///
    /// With a restriction, demand is the closure of adapters needed to
    /// produce the restricted keys. Without one, it grows from the adapters
    /// that start on their own until no managed adapter changes state.
    pub fn plan(descriptors: &[AdapterDescriptor], restriction: Option<&KeySet>) -> DemandPlan {
        let all_produced: KeySet = descriptors
            .iter()
            .flat_map(|d| d.produced_keys.iter().cloned())
            .collect();

        match restriction.filter(|r| !r.is_empty()) {
            Some(restriction) => Self::plan_restricted(descriptors, restriction, &all_produced),
            None => Self::plan_unrestricted(descriptors, &all_produced),
        }
    }

    fn plan_restricted(
        descriptors: &[AdapterDescriptor],
        restriction: &KeySet,
        all_produced: &KeySet,
    ) -> DemandPlan {
        let mut required = restriction.clone();
        let mut members: BTreeSet<usize> = BTreeSet::new();

        loop {
            let found: Vec<usize> = descriptors
                .iter()
                .enumerate()
                .filter(|(idx, d)| {
                    !members.contains(idx) && !d.produced_keys.is_disjoint(&required)
                })
                .map(|(idx, _)| idx)
                .collect();
            if found.is_empty() {
                break;
            }
            for idx in found {
                members.insert(idx);
                let member = &descriptors[idx];
                if member.role == RoleKind::Producer {
                    continue;
                }
                match &member.subscribed_keys {
                    Some(keys) => required.extend(keys.iter().cloned()),
                    None => required.extend(all_produced.iter().cloned()),
                }
            }
        }

        let demanded_outputs: KeySet = members
            .iter()
            .flat_map(|&idx| descriptors[idx].produced_keys.iter().cloned())
            .collect();
        trace!(
            members = members.len(),
            outputs = demanded_outputs.len(),
            inputs = required.len(),
            "Restricted demand traversal"
        );

        let decisions = descriptors
            .iter()
            .filter(|d| !d.auto_start)
            .map(|d| evaluate(d, &demanded_outputs, &required))
            .collect();

        DemandPlan {
            demanded_outputs,
            demanded_inputs: required,
            decisions,
            restricted: true,
        }
    }

    fn plan_unrestricted(descriptors: &[AdapterDescriptor], all_produced: &KeySet) -> DemandPlan {
        let mut active: Vec<bool> = descriptors.iter().map(|d| d.auto_start && d.enabled).collect();

        loop {
            let mut outputs = KeySet::new();
            let mut inputs = KeySet::new();
            for (d, _) in descriptors.iter().zip(&active).filter(|(_, on)| **on) {
                if d.role != RoleKind::Consumer {
                    outputs.extend(d.produced_keys.iter().cloned());
                }
                if d.role != RoleKind::Producer {
                    match &d.subscribed_keys {
                        Some(keys) => inputs.extend(keys.iter().cloned()),
                        None => inputs.extend(all_produced.iter().cloned()),
                    }
                }
            }

            let decisions: Vec<DemandDecision> = descriptors
                .iter()
                .filter(|d| !d.auto_start)
                .map(|d| evaluate(d, &outputs, &inputs))
                .collect();

            let mut grew = false;
            for decision in decisions.iter().filter(|d| d.enable) {
                if let Some(idx) = descriptors.iter().position(|d| d.id == decision.id) {
                    if !active[idx] {
                        active[idx] = true;
                        grew = true;
                    }
                }
            }

            if !grew {
                return DemandPlan {
                    demanded_outputs: outputs,
                    demanded_inputs: inputs,
                    decisions,
                    restricted: false,
                };
            }
        }
    }

    /// Write the plan back to the adapters it names.
    ///
    /// Requested keys are written only when they differ from the adapter's
    /// current value, and `set_enabled` is called only on a change.
    pub fn apply(plan: &DemandPlan, registrations: &[AdapterRegistration]) -> DemandOutcome {
        let by_id: HashMap<&AdapterId, &AdapterRegistration> =
            registrations.iter().map(|r| (r.id(), r)).collect();
        let mut outcome = DemandOutcome::default();

        for decision in &plan.decisions {
            let Some(registration) = by_id.get(&decision.id) else {
                continue;
            };
            let adapter = &registration.adapter;

            if decision.write_input && adapter.requested_input_keys() != decision.requested_input {
                adapter.set_requested_input_keys(decision.requested_input.clone());
                outcome.keys_updated += 1;
            }
            if decision.write_output && adapter.requested_output_keys() != decision.requested_output {
                adapter.set_requested_output_keys(decision.requested_output.clone());
                outcome.keys_updated += 1;
            }
            if adapter.enabled() != decision.enable {
                debug!(adapter = %decision.id, enable = decision.enable, "Connect-on-demand state change");
                adapter.set_enabled(decision.enable);
                if decision.enable {
                    outcome.started += 1;
                } else {
                    outcome.stopped += 1;
                }
            }
        }

        observability::record_demand_adapters_enabled(plan.enabled_count());
        outcome
    }
}

fn evaluate(d: &AdapterDescriptor, outputs: &KeySet, inputs: &KeySet) -> DemandDecision {
    let requested_input = || match &d.subscribed_keys {
        Some(keys) => keys.intersection(outputs).cloned().collect::<KeySet>(),
        None => outputs.clone(),
    };
    let requested_output = || d.produced_keys.intersection(inputs).cloned().collect::<KeySet>();

    let (input, output, write_input, write_output) = match d.role {
        RoleKind::Consumer => (Some(requested_input()), None, true, false),
        RoleKind::Producer => (None, Some(requested_output()), false, true),
        RoleKind::Both => {
            let neither = !d.respect_input_demand && !d.respect_output_demand;
            let output = (d.respect_output_demand || neither).then(requested_output);
            let input = (d.respect_input_demand || neither).then(requested_input);
            (input, output, d.respect_input_demand, d.respect_output_demand)
        }
    };

    let has_output = output.as_ref().is_some_and(|k| !k.is_empty());
    let has_input = input.as_ref().is_some_and(|k| !k.is_empty());
    let enable = has_output || has_input;

    DemandDecision {
        id: d.id.clone(),
        role: d.role,
        enable,
        requested_input: input.filter(|_| enable),
        requested_output: output.filter(|_| enable),
        write_input,
        write_output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use contracts::{key_set, Adapter, ContractError, MeasurementRef, MeasurementSink};
    use parking_lot::Mutex;

    fn descriptor(
        name: &str,
        role: RoleKind,
        subscribed: Option<&[&str]>,
        produced: &[&str],
        auto_start: bool,
    ) -> AdapterDescriptor {
        AdapterDescriptor {
            id: name.into(),
            role,
            subscribed_keys: subscribed.map(|keys| key_set(keys.iter().copied())),
            produced_keys: key_set(produced.iter().copied()),
            enabled: auto_start,
            auto_start,
            respect_input_demand: false,
            respect_output_demand: false,
            dependency_timeout: None,
            dependencies: Vec::new(),
            requested_input_keys: None,
            requested_output_keys: None,
        }
    }

    #[test]
    fn test_output_adapter_follows_producer() {
        let output = descriptor("O", RoleKind::Consumer, Some(&["K1"]), &[], false);

        let plan = DemandController::plan(&[output.clone()], None);
        let o = plan.decision("O").unwrap();
        assert!(!o.enable);
        assert_eq!(o.requested_input, None);

        let producer = descriptor("P", RoleKind::Producer, None, &["K1", "K2"], true);
        let plan = DemandController::plan(&[producer, output], None);
        let o = plan.decision("O").unwrap();
        assert!(o.enable);
        assert_eq!(o.requested_input, Some(key_set(["K1"])));
    }

    #[test]
    fn test_disjoint_subscription_yields_empty_set_before_disable() {
        let mut relay = descriptor("R", RoleKind::Both, Some(&["K9"]), &["Y"], false);
        relay.respect_input_demand = true;
        relay.respect_output_demand = true;
        let producer = descriptor("P", RoleKind::Producer, None, &["K1"], true);
        let sink = descriptor("S", RoleKind::Consumer, Some(&["Y"]), &[], true);

        let plan = DemandController::plan(&[producer, relay, sink], None);
        let r = plan.decision("R").unwrap();
        // Output is demanded by S, input has nothing to feed it
        assert!(r.enable);
        assert_eq!(r.requested_output, Some(key_set(["Y"])));
        assert_eq!(r.requested_input, Some(KeySet::new()));
    }

    #[test]
    fn test_managed_adapters_do_not_latch_each_other() {
        let mut a = descriptor("A", RoleKind::Both, Some(&["X"]), &["Y"], false);
        let mut b = descriptor("B", RoleKind::Both, Some(&["Y"]), &["X"], false);
        a.enabled = true;
        b.enabled = true;

        let plan = DemandController::plan(&[a, b], None);
        assert_eq!(plan.enabled_count(), 0);
    }

    #[test]
    fn test_demand_chains_through_managed_relay() {
        let producer = descriptor("P", RoleKind::Producer, None, &["A"], true);
        let relay = descriptor("R", RoleKind::Both, Some(&["A"]), &["B"], false);
        let output = descriptor("O", RoleKind::Consumer, Some(&["B"]), &[], false);

        let plan = DemandController::plan(&[producer, relay, output], None);
        assert!(plan.decision("R").unwrap().enable);
        assert!(plan.decision("O").unwrap().enable);
        assert!(plan.demanded_outputs.contains(&contracts::SignalKey::from_tag("B")));
    }

    #[test]
    fn test_restriction_walks_dependency_chain() {
        let p1 = descriptor("P1", RoleKind::Producer, None, &["A"], false);
        let p2 = descriptor("P2", RoleKind::Producer, None, &["C"], false);
        let relay = descriptor("R", RoleKind::Both, Some(&["A"]), &["B"], true);

        let restriction = key_set(["B"]);
        let plan = DemandController::plan(&[p1, p2, relay], Some(&restriction));

        assert!(plan.restricted);
        assert_eq!(plan.demanded_inputs, key_set(["A", "B"]));
        assert_eq!(plan.demanded_outputs, key_set(["A", "B"]));
        let p1 = plan.decision("P1").unwrap();
        assert!(p1.enable);
        assert_eq!(p1.requested_output, Some(key_set(["A"])));
        assert!(!plan.decision("P2").unwrap().enable);
    }

    #[test]
    fn test_empty_restriction_means_unrestricted() {
        let producer = descriptor("P", RoleKind::Producer, None, &["K1"], true);
        let plan = DemandController::plan(&[producer], Some(&KeySet::new()));
        assert!(!plan.restricted);
    }

    #[test]
    fn test_both_role_writes_only_respected_side() {
        let mut relay = descriptor("R", RoleKind::Both, Some(&["A"]), &["B"], false);
        relay.respect_output_demand = true;
        let sink = descriptor("S", RoleKind::Consumer, Some(&["B"]), &[], true);

        let plan = DemandController::plan(&[relay, sink], None);
        let r = plan.decision("R").unwrap();
        assert!(r.enable);
        assert!(r.write_output);
        assert!(!r.write_input);
        assert_eq!(r.requested_input, None);
    }

    struct Probe {
        id: AdapterId,
        subscribed: KeySet,
        enabled: AtomicBool,
        toggles: AtomicUsize,
        requested_input: Mutex<Option<KeySet>>,
    }

    impl Adapter for Probe {
        fn id(&self) -> &AdapterId {
            &self.id
        }
        fn subscribed_keys(&self) -> Option<KeySet> {
            Some(self.subscribed.clone())
        }
        fn produced_keys(&self) -> KeySet {
            KeySet::new()
        }
        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
        fn set_enabled(&self, enabled: bool) {
            self.toggles.fetch_add(1, Ordering::SeqCst);
            self.enabled.store(enabled, Ordering::SeqCst);
        }
        fn auto_start(&self) -> bool {
            false
        }
        fn requested_input_keys(&self) -> Option<KeySet> {
            self.requested_input.lock().clone()
        }
        fn set_requested_input_keys(&self, keys: Option<KeySet>) {
            *self.requested_input.lock() = keys;
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

    #[test]
    fn test_apply_is_change_only() {
        let probe = Arc::new(Probe {
            id: "O".into(),
            subscribed: key_set(["K1"]),
            enabled: AtomicBool::new(false),
            toggles: AtomicUsize::new(0),
            requested_input: Mutex::new(None),
        });
        let registrations = vec![AdapterRegistration::consumer(Arc::clone(&probe))];
        let producer = descriptor("P", RoleKind::Producer, None, &["K1"], true);

        let descriptors = vec![producer.clone(), registrations[0].describe()];
        let plan = DemandController::plan(&descriptors, None);
        let first = DemandController::apply(&plan, &registrations);
        assert_eq!(first, DemandOutcome { started: 1, stopped: 0, keys_updated: 1 });

        let second = DemandController::apply(&plan, &registrations);
        assert_eq!(second, DemandOutcome::default());
        assert_eq!(probe.toggles.load(Ordering::SeqCst), 1);

        let plan = DemandController::plan(&[registrations[0].describe()], None);
        let third = DemandController::apply(&plan, &registrations);
        assert_eq!(third.stopped, 1);
        assert_eq!(probe.requested_input_keys(), None);
    }
}
