//! 消费者适配器
//!
//! - [`CollectingConsumer`]: 保存收到的每个测量值 (测试用)
//! - [`LogConsumer`]: 只计数和记录日志，不保存数据

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use contracts::{ContractError, KeySet, MeasurementRef, MeasurementSink};

use crate::macros::impl_adapter;
use crate::state::{AdapterSettings, AdapterState};

/// 批次被 ingest 后调用，例如向引擎报告处理完成。
pub type IngestHook = Arc<dyn Fn(&[MeasurementRef]) + Send + Sync>;

/// Behaviour knobs shared by the consumers.
#[derive(Default)]
struct IngestControl {
    delay_ms: AtomicU64,
    failing: AtomicBool,
    hook: RwLock<Option<IngestHook>>,
}

impl IngestControl {
    /// Apply the configured delay and failure before a batch is accepted.
    fn before(&self, state: &AdapterState) -> Result<(), ContractError> {
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.failing.load(Ordering::Relaxed) {
            state.inc_failed();
            return Err(ContractError::ingest(state.id().as_str(), "simulated ingest failure"));
        }
        Ok(())
    }

    fn after(&self, batch: &[MeasurementRef]) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(batch);
        }
    }
}

/// 按到达顺序记录所有 ingest 数据的消费者
pub struct CollectingConsumer {
    state: Arc<AdapterState>,
    subscribed: Option<KeySet>,
    produced: KeySet,
    received: Mutex<Vec<MeasurementRef>>,
    batch_sizes: Mutex<Vec<usize>>,
    control: IngestControl,
}

impl CollectingConsumer {
    /// `subscribed == None` receives every signal.
    pub fn new(name: &str, subscribed: Option<KeySet>) -> Arc<Self> {
        Self::with_settings(name, subscribed, AdapterSettings::default())
    }

    pub fn with_settings(name: &str, subscribed: Option<KeySet>, settings: AdapterSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(AdapterState::new(name, settings)),
            subscribed,
            produced: KeySet::new(),
            received: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            control: IngestControl::default(),
        })
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    pub fn received(&self) -> Vec<MeasurementRef> {
        self.received.lock().clone()
    }

    pub fn values(&self) -> Vec<f64> {
        self.received.lock().iter().map(|m| m.value).collect()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// 此后拒绝所有批次 (模拟故障)
    pub fn set_failing(&self, failing: bool) {
        self.control.failing.store(failing, Ordering::Relaxed);
    }

    /// 每批模拟处理耗时
    pub fn set_ingest_delay(&self, delay: Duration) {
        self.control
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_on_ingest(&self, hook: IngestHook) {
        *self.control.hook.write() = Some(hook);
    }

    fn on_enabled_changed(&self, _enabled: bool) {}
}

impl_adapter!(CollectingConsumer);

impl MeasurementSink for CollectingConsumer {
    fn ingest(&self, batch: &[MeasurementRef]) -> Result<(), ContractError> {
        self.control.before(&self.state)?;
        self.received.lock().extend(batch.iter().cloned());
        self.batch_sizes.lock().push(batch.len());
        self.state.add_received(batch.len());
        self.control.after(batch);
        Ok(())
    }
}

/// Consumer that only counts what it receives.
///
/// Batches arriving while disabled are counted and otherwise ignored.
pub struct LogConsumer {
    state: Arc<AdapterState>,
    subscribed: Option<KeySet>,
    produced: KeySet,
    ignored: AtomicU64,
    control: IngestControl,
}

impl LogConsumer {
    pub fn new(name: &str, subscribed: Option<KeySet>, settings: AdapterSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(AdapterState::new(name, settings)),
            subscribed,
            produced: KeySet::new(),
            ignored: AtomicU64::new(0),
            control: IngestControl::default(),
        })
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    /// Measurements dropped while disabled
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn set_ingest_delay(&self, delay: Duration) {
        self.control
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_on_ingest(&self, hook: IngestHook) {
        *self.control.hook.write() = Some(hook);
    }

    fn on_enabled_changed(&self, enabled: bool) {
        debug!(adapter = %self.state.id(), enabled, "log consumer toggled");
    }
}

impl_adapter!(LogConsumer);

impl MeasurementSink for LogConsumer {
    fn ingest(&self, batch: &[MeasurementRef]) -> Result<(), ContractError> {
        if !self.state.is_enabled() {
            self.ignored.fetch_add(batch.len() as u64, Ordering::Relaxed);
            return Ok(());
        }
        self.control.before(&self.state)?;
        self.state.add_received(batch.len());
        if let (Some(first), Some(last)) = (batch.first(), batch.last()) {
            trace!(
                adapter = %self.state.id(),
                count = batch.len(),
                first = %first.key,
                last_value = last.value,
                "batch ingested"
            );
        }
        self.control.after(batch);
        Ok(())
    }
}
