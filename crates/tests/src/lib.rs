//! # Integration Tests
//!
//! End-to-end tests of the routing engine.
//!
//! Covers:
//! - fan-out and stale route purging
//! - snapshot version monotonicity
//! - coalesced recalculation
//! - dependency-ordered delivery and timeouts
//! - connect-on-demand propagation
//! - lossless multi-producer queueing

#[cfg(test)]
mod support {
    use std::time::Duration;

    use contracts::{Measurement, MeasurementRef, SignalKey};

    /// Poll `check` until it holds or `timeout` elapses.
    pub async fn eventually(timeout: Duration, check: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn batch(tag: &str, values: &[f64]) -> Vec<MeasurementRef> {
        let key = SignalKey::from_tag(tag);
        values
            .iter()
            .map(|v| Measurement::now(key.clone(), *v).into_ref())
            .collect()
    }
}

#[cfg(test)]
mod queue_tests {
    use dispatcher::DoubleBufferedQueue;

    /// 10 producer threads x 10,000 items against a concurrent drain.
    #[test]
    fn test_concurrent_enqueue_loses_nothing_and_keeps_order() {
        const PRODUCERS: usize = 10;
        const ITEMS: usize = 10_000;

        let mut queue = DoubleBufferedQueue::<(usize, usize)>::with_capacity(1024);
        let threads: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let producer = queue.producer();
                std::thread::spawn(move || {
                    for i in 0..ITEMS {
                        producer.enqueue((p, i)).unwrap();
                    }
                })
            })
            .collect();

        let mut next = vec![0usize; PRODUCERS];
        let mut total = 0;
        while total < PRODUCERS * ITEMS {
            let outcome = queue.drain(512, |chunk| {
                for &(p, i) in chunk {
                    assert_eq!(i, next[p], "producer {p} out of order");
                    next[p] += 1;
                }
                Ok::<(), ()>(())
            });
            assert!(outcome.errors.is_empty());
            total += outcome.drained;
            if outcome.drained == 0 {
                std::thread::yield_now();
            }
        }

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(total, PRODUCERS * ITEMS);
        assert!(next.iter().all(|&n| n == ITEMS));
        assert!(queue.is_empty());
    }
}

#[cfg(test)]
mod routing_tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use adapters::{CollectingConsumer, ManualProducer};
    use contracts::{
        key_set, Adapter, AdapterId, AdapterRegistration, ContractError, EngineConfig, KeySet,
        Measurement, MeasurementRef, MeasurementSink, RoutingStrategy, SignalKey,
    };
    use routing::{RoutingTables, TopologyPatch};

    use crate::support::{batch, eventually};

    struct FanOut {
        tables: Arc<RoutingTables>,
        producer: Arc<ManualProducer>,
        a: Arc<CollectingConsumer>,
        b: Arc<CollectingConsumer>,
        all: Arc<CollectingConsumer>,
        other: Arc<CollectingConsumer>,
    }

    fn fan_out(config: EngineConfig) -> FanOut {
        let tables = RoutingTables::new(config).unwrap();
        tables.initialize(None, None);

        let producer = ManualProducer::new("P", key_set(["K1", "K2"]));
        let a = CollectingConsumer::new("A", Some(key_set(["K1"])));
        let b = CollectingConsumer::new("B", Some(key_set(["K1", "K2"])));
        let all = CollectingConsumer::new("ALL", None);
        let other = CollectingConsumer::new("OTHER", Some(key_set(["K9"])));

        tables
            .patch_routing_table(
                TopologyPatch::new()
                    .add(AdapterRegistration::producer(Arc::clone(&producer)))
                    .add(AdapterRegistration::consumer(Arc::clone(&a)))
                    .add(AdapterRegistration::consumer(Arc::clone(&b)))
                    .add(AdapterRegistration::consumer(Arc::clone(&all)))
                    .add(AdapterRegistration::consumer(Arc::clone(&other))),
            )
            .unwrap();

        FanOut {
            tables,
            producer,
            a,
            b,
            all,
            other,
        }
    }

    async fn assert_fan_out(setup: &FanOut) {
        assert!(setup.producer.emit(batch("K1", &[1.0, 2.0, 3.0])));
        assert!(setup.producer.emit(batch("K2", &[4.0, 5.0])));

        assert!(
            eventually(Duration::from_secs(2), || {
                setup.a.count() == 3 && setup.b.count() == 5 && setup.all.count() == 5
            })
            .await
        );
        assert_eq!(setup.a.values(), vec![1.0, 2.0, 3.0]);
        assert_eq!(setup.b.values(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(setup.other.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fan_out_low_latency() {
        let setup = fan_out(EngineConfig::default());
        assert_fan_out(&setup).await;
        setup.tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fan_out_high_latency() {
        let setup = fan_out(EngineConfig {
            strategy: RoutingStrategy::HighLatency { tick_ms: 5 },
            ..Default::default()
        });
        assert_fan_out(&setup).await;
        setup.tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_removed_consumer_stops_receiving() {
        let setup = fan_out(EngineConfig::default());
        assert_fan_out(&setup).await;

        setup
            .tables
            .patch_routing_table(TopologyPatch::new().remove("B"))
            .unwrap();
        assert!(setup.tables.snapshot().consumer(&AdapterId::from("B")).is_none());

        assert!(setup.producer.emit(batch("K1", &[6.0])));
        assert!(eventually(Duration::from_secs(2), || setup.a.count() == 4).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(setup.b.count(), 5);
        setup.tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_snapshot_versions_increase_and_readers_keep_theirs() {
        let setup = fan_out(EngineConfig::default());
        let k1 = SignalKey::from_tag("K1");

        let before = setup.tables.snapshot();
        assert_eq!(before.version(), 1);
        assert!(before.consumer_ids_for(&k1).contains(&AdapterId::from("B")));

        let mut last = before.version();
        for name in ["X1", "X2", "X3"] {
            let consumer = CollectingConsumer::new(name, Some(key_set(["K1"])));
            let version = setup
                .tables
                .patch_routing_table(TopologyPatch::new().add(AdapterRegistration::consumer(consumer)))
                .unwrap();
            assert!(version > last);
            last = version;
        }
        setup
            .tables
            .patch_routing_table(TopologyPatch::new().remove("B"))
            .unwrap();

        assert!(setup.tables.calculate_routing_tables(None).await.unwrap());
        let after = setup.tables.snapshot();
        assert!(after.version() > last);

        // A reader holding the old snapshot sees it unchanged.
        assert_eq!(before.version(), 1);
        assert!(before.consumer_ids_for(&k1).contains(&AdapterId::from("B")));
        assert!(!after.consumer_ids_for(&k1).contains(&AdapterId::from("B")));
        setup.tables.shutdown().await;
    }

    const SEQ_SPAN: u64 = 1_000_000_000;
    const CHURN_BATCH: u64 = 10;

    fn encode(producer: usize, seq: u64) -> f64 {
        (producer as u64 * SEQ_SPAN + seq) as f64
    }

    /// (producer, seq) pairs in arrival order.
    fn decode(values: &[f64]) -> Vec<(usize, u64)> {
        values
            .iter()
            .map(|v| {
                let v = *v as u64;
                ((v / SEQ_SPAN) as usize, v % SEQ_SPAN)
            })
            .collect()
    }

    /// Each producer's sequence numbers strictly increase, so nothing repeats.
    fn assert_per_producer_order(name: &str, received: &[(usize, u64)], producers: usize) {
        let mut last = vec![None; producers];
        for &(p, seq) in received {
            if let Some(prev) = last[p] {
                assert!(seq > prev, "{name}: producer {p} went from {prev} to {seq}");
            }
            last[p] = Some(seq);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_routing_while_consumers_churn() {
        const PRODUCERS: usize = 4;
        const ROUNDS: usize = 25;

        let tables = RoutingTables::new(EngineConfig::default()).unwrap();
        tables.initialize(None, None);
        let stable = CollectingConsumer::new("STABLE", Some(key_set(["K1"])));
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| ManualProducer::new(&format!("P{p}"), key_set(["K1"])))
            .collect();
        let initial = producers.iter().fold(
            TopologyPatch::new().add(AdapterRegistration::consumer(Arc::clone(&stable))),
            |patch, p| patch.add(AdapterRegistration::producer(Arc::clone(p))),
        );
        tables.patch_routing_table(initial).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        // Next sequence number each producer will emit; advanced after each emit returns.
        let progress: Arc<Vec<AtomicU64>> = Arc::new((0..PRODUCERS).map(|_| AtomicU64::new(0)).collect());
        let threads: Vec<_> = producers
            .iter()
            .enumerate()
            .map(|(p, producer)| {
                let producer = Arc::clone(producer);
                let stop = Arc::clone(&stop);
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    let key = SignalKey::from_tag("K1");
                    let mut seq = 0;
                    while !stop.load(Ordering::Relaxed) {
                        let chunk = (seq..seq + CHURN_BATCH)
                            .map(|s| Measurement::now(key.clone(), encode(p, s)).into_ref())
                            .collect();
                        assert!(producer.emit(chunk));
                        seq += CHURN_BATCH;
                        progress[p].store(seq, Ordering::SeqCst);
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        let mut churned = Vec::with_capacity(ROUNDS);
        for round in 0..ROUNDS {
            let name = format!("C{round}");
            let consumer = CollectingConsumer::new(&name, Some(key_set(["K1"])));
            tables
                .patch_routing_table(TopologyPatch::new().add(AdapterRegistration::consumer(Arc::clone(&consumer))))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            tables
                .patch_routing_table(TopologyPatch::new().remove(name.as_str()))
                .unwrap();
            let marks: Vec<u64> = progress.iter().map(|p| p.load(Ordering::SeqCst)).collect();
            churned.push((name, consumer, marks));
        }

        stop.store(true, Ordering::Relaxed);
        for thread in threads {
            thread.join().unwrap();
        }
        let emitted: u64 = progress.iter().map(|p| p.load(Ordering::SeqCst)).sum();

        assert!(eventually(Duration::from_secs(5), || stable.count() as u64 == emitted).await);
        let received = decode(&stable.values());
        assert_per_producer_order("STABLE", &received, PRODUCERS);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stable.count() as u64, emitted);

        for (name, consumer, marks) in &churned {
            let received = decode(&consumer.values());
            assert_per_producer_order(name, &received, PRODUCERS);
            // Only an emit already in flight when the removal returned may still arrive.
            for &(p, seq) in &received {
                assert!(
                    seq < marks[p] + CHURN_BATCH,
                    "{name} got seq {seq} from P{p} after removal at {}",
                    marks[p]
                );
            }
        }
        tables.shutdown().await;
    }

    /// Consumer whose key lookups are slow, to keep a recalculation running.
    struct SlowConsumer {
        id: AdapterId,
        enabled: AtomicBool,
        delay: Duration,
    }

    impl Adapter for SlowConsumer {
        fn id(&self) -> &AdapterId {
            &self.id
        }
        fn subscribed_keys(&self) -> Option<KeySet> {
            std::thread::sleep(self.delay);
            Some(key_set(["K1"]))
        }
        fn produced_keys(&self) -> KeySet {
            KeySet::new()
        }
        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::Relaxed)
        }
        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::Relaxed);
        }
        fn requested_input_keys(&self) -> Option<KeySet> {
            None
        }
        fn set_requested_input_keys(&self, _keys: Option<KeySet>) {}
        fn requested_output_keys(&self) -> Option<KeySet> {
            None
        }
        fn set_requested_output_keys(&self, _keys: Option<KeySet>) {}
    }

    impl MeasurementSink for SlowConsumer {
        fn ingest(&self, _batch: &[MeasurementRef]) -> Result<(), ContractError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_recalculations_coalesce() {
        let tables = RoutingTables::new(EngineConfig::default()).unwrap();
        tables.initialize(None, None);
        let slow = Arc::new(SlowConsumer {
            id: AdapterId::from("slow"),
            enabled: AtomicBool::new(true),
            delay: Duration::from_millis(100),
        });
        tables
            .patch_routing_table(TopologyPatch::new().add(AdapterRegistration::consumer(slow)))
            .unwrap();
        let base = tables.snapshot().version();

        let calls: Vec<_> = (0..10).map(|_| tables.calculate_routing_tables(None)).collect();
        let mut executed = 0;
        for call in calls {
            if call.await.unwrap() {
                executed += 1;
            }
        }

        let stats = tables.stats();
        assert!((1..=2).contains(&executed), "executed {executed}");
        assert_eq!(stats.recalculations, executed);
        assert_eq!(stats.coalesced_recalculations, 10 - executed);
        assert_eq!(stats.version, base + executed);
        tables.shutdown().await;
    }
}

#[cfg(test)]
mod dependency_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Weak};
    use std::time::{Duration, Instant};

    use adapters::{AdapterSettings, CollectingConsumer, ManualProducer};
    use contracts::{key_set, AdapterId, AdapterRegistration, EngineConfig, MeasurementRef};
    use parking_lot::Mutex;
    use routing::{RoutingTables, TopologyPatch};

    use crate::support::{batch, eventually};

    type Times = Arc<Mutex<HashMap<u64, Vec<Instant>>>>;

    struct Chain {
        tables: Arc<RoutingTables>,
        producer: Arc<ManualProducer>,
        calc: Arc<CollectingConsumer>,
        archive: Arc<CollectingConsumer>,
        calc_done: Times,
        archive_seen: Times,
    }

    fn record(times: &Times, batch: &[MeasurementRef]) {
        let now = Instant::now();
        let mut times = times.lock();
        for m in batch {
            times.entry(m.value.to_bits()).or_default().push(now);
        }
    }

    /// P -> {calc, archive}, archive depends on calc.
    fn chain(timeout: Duration) -> Chain {
        let tables = RoutingTables::new(EngineConfig::default()).unwrap();
        tables.initialize(None, None);

        let producer = ManualProducer::new("P", key_set(["K1"]));
        let calc = CollectingConsumer::new("calc", Some(key_set(["K1"])));
        calc.set_ingest_delay(Duration::from_millis(20));
        let archive = CollectingConsumer::with_settings(
            "archive",
            Some(key_set(["K1"])),
            AdapterSettings::default().depends_on("calc").timeout(timeout),
        );

        let calc_done: Times = Arc::default();
        let archive_seen: Times = Arc::default();

        let weak: Weak<RoutingTables> = Arc::downgrade(&tables);
        let done = Arc::clone(&calc_done);
        calc.set_on_ingest(Arc::new(move |batch: &[MeasurementRef]| {
            record(&done, batch);
            if let Some(tables) = weak.upgrade() {
                let id = AdapterId::from("calc");
                for m in batch {
                    tables.notify_processed(&id, m);
                }
            }
        }));
        let seen = Arc::clone(&archive_seen);
        archive.set_on_ingest(Arc::new(move |batch: &[MeasurementRef]| record(&seen, batch)));

        tables
            .patch_routing_table(
                TopologyPatch::new()
                    .add(AdapterRegistration::producer(Arc::clone(&producer)))
                    .add(AdapterRegistration::consumer(Arc::clone(&calc)))
                    .add(AdapterRegistration::consumer(Arc::clone(&archive))),
            )
            .unwrap();

        Chain {
            tables,
            producer,
            calc,
            archive,
            calc_done,
            archive_seen,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dependent_receives_after_dependency_completes() {
        let setup = chain(Duration::from_secs(5));
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        for v in values {
            assert!(setup.producer.emit(batch("K1", &[v])));
        }

        assert!(eventually(Duration::from_secs(3), || setup.archive.count() == values.len()).await);

        let calc_done = setup.calc_done.lock();
        let archive_seen = setup.archive_seen.lock();
        for v in values {
            let delivered = &archive_seen[&v.to_bits()];
            assert_eq!(delivered.len(), 1, "value {v} delivered more than once");
            assert!(delivered[0] >= calc_done[&v.to_bits()][0]);
        }
        drop((calc_done, archive_seen));

        let summary = setup.tables.metrics_summary();
        assert_eq!(summary.dependency_satisfied, values.len() as u64);
        assert_eq!(summary.dependency_timed_out, 0);
        setup.tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dependent_released_once_after_timeout() {
        let setup = chain(Duration::from_millis(100));
        setup.calc.set_failing(true);

        let emitted_at = Instant::now();
        let values = [1.0, 2.0, 3.0];
        assert!(setup.producer.emit(batch("K1", &values)));

        assert!(eventually(Duration::from_secs(3), || setup.archive.count() == values.len()).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(setup.archive.count(), values.len());
        assert_eq!(setup.calc.count(), 0);

        let archive_seen = setup.archive_seen.lock();
        for v in values {
            let delivered = &archive_seen[&v.to_bits()];
            assert_eq!(delivered.len(), 1);
            assert!(delivered[0].duration_since(emitted_at) >= Duration::from_millis(90));
        }
        drop(archive_seen);

        let summary = setup.tables.metrics_summary();
        assert_eq!(summary.dependency_timed_out, values.len() as u64);
        assert_eq!(setup.tables.stats().pending_dependencies, 0);
        setup.tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_flushes_pending_dependents() {
        let setup = chain(Duration::from_secs(30));
        setup.calc.set_failing(true);
        assert!(setup.producer.emit(batch("K1", &[1.0, 2.0])));

        assert!(eventually(Duration::from_secs(2), || setup.tables.stats().pending_dependencies == 2).await);
        setup.tables.shutdown().await;
        assert_eq!(setup.archive.count(), 2);
    }
}

#[cfg(test)]
mod demand_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use adapters::{AdapterSettings, CollectingConsumer, ManualProducer, RelayAdapter};
    use contracts::{key_set, Adapter, AdapterRegistration, EngineConfig};
    use routing::{RoutingTables, TopologyPatch};

    use crate::support::{batch, eventually};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restriction_starts_the_producing_chain() {
        let tables = RoutingTables::new(EngineConfig::default()).unwrap();
        tables.initialize(None, None);

        let producer = ManualProducer::with_settings(
            "P",
            key_set(["K1", "K2"]),
            AdapterSettings::default().manual(),
        );
        let derive = RelayAdapter::new(
            "R",
            Some(key_set(["K1"])),
            key_set(["K3"]),
            AdapterSettings::default().manual().respect_output(),
        );
        let unused = RelayAdapter::new(
            "D",
            Some(key_set(["K2"])),
            key_set(["K4"]),
            AdapterSettings::default().manual().respect_output(),
        );
        let sink = CollectingConsumer::with_settings(
            "C",
            Some(key_set(["K3"])),
            AdapterSettings::default().manual(),
        );

        tables
            .patch_routing_table(
                TopologyPatch::new()
                    .add(AdapterRegistration::producer(Arc::clone(&producer)))
                    .add(AdapterRegistration::action(Arc::clone(&derive)))
                    .add(AdapterRegistration::action(Arc::clone(&unused)))
                    .add(AdapterRegistration::consumer(Arc::clone(&sink))),
            )
            .unwrap();
        assert!(!producer.enabled());
        assert!(!derive.enabled());

        assert!(tables
            .calculate_routing_tables(Some(key_set(["K3"])))
            .await
            .unwrap());

        assert!(producer.enabled());
        assert_eq!(producer.requested_output_keys(), Some(key_set(["K1"])));
        assert!(derive.enabled());
        assert_eq!(derive.requested_output_keys(), Some(key_set(["K3"])));
        assert!(!unused.enabled());
        assert!(sink.enabled());
        assert_eq!(sink.requested_input_keys(), Some(key_set(["K3"])));

        // The enabled chain carries data end to end.
        assert!(producer.emit(batch("K1", &[7.0])));
        assert!(eventually(Duration::from_secs(2), || sink.count() == 1).await);
        assert_eq!(sink.values(), vec![7.0]);

        // Without a restriction nothing self-starting demands the chain.
        assert!(tables.calculate_routing_tables(None).await.unwrap());
        assert!(!producer.enabled());
        assert!(!derive.enabled());
        assert!(!sink.enabled());
        tables.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auto_started_consumer_pulls_producers_on() {
        let tables = RoutingTables::new(EngineConfig::default()).unwrap();
        tables.initialize(None, None);

        let producer = ManualProducer::with_settings(
            "P",
            key_set(["K1", "K2"]),
            AdapterSettings::default().manual(),
        );
        let archive = CollectingConsumer::new("archive", Some(key_set(["K2"])));

        tables
            .patch_routing_table(
                TopologyPatch::new()
                    .add(AdapterRegistration::producer(Arc::clone(&producer)))
                    .add(AdapterRegistration::consumer(Arc::clone(&archive))),
            )
            .unwrap();

        assert!(producer.enabled());
        assert_eq!(producer.requested_output_keys(), Some(key_set(["K2"])));

        tables.patch_routing_table(TopologyPatch::new().remove("archive")).unwrap();
        assert!(!producer.enabled());
        assert_eq!(producer.requested_output_keys(), None);
        tables.shutdown().await;
    }
}

#[cfg(test)]
mod config_tests {
    use adapters::build_topology;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::RoutingStrategy;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blueprint_builds_topology() {
        let content = r#"
[engine.strategy]
mode = "high_latency"
tick_ms = 10

[[adapters]]
name = "pmu"
kind = "producer"
outputs = ["FREQ"]
rate_hz = 50.0

[[adapters]]
name = "archive"
kind = "consumer"
"#;
        let blueprint = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        assert_eq!(blueprint.engine.strategy, RoutingStrategy::HighLatency { tick_ms: 10 });

        let built = build_topology(&blueprint.adapters, &tokio::runtime::Handle::current()).unwrap();
        assert_eq!(built.len(), 2);
        assert!(built[0].registration().is_producer());
        assert!(built[1].registration().is_consumer());
    }
}
