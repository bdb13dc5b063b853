//! Adapter macros
//!
//! Every reference adapter keeps its contract state in an [`AdapterState`]
//! and its keys in `subscribed` / `produced` fields. This macro generates the
//! `Adapter` implementation on top of that layout.
//!
//! [`AdapterState`]: crate::AdapterState

/// Implement `contracts::Adapter` for a type with `state: Arc<AdapterState>`,
/// `subscribed: Option<KeySet>` and `produced: KeySet` fields and an inherent
/// `on_enabled_changed(&self, bool)` hook.
///
/// # Usage
/// ```ignore
/// impl_adapter!(CollectingConsumer);
/// ```
macro_rules! impl_adapter {
    ($adapter:ident) => {
        impl contracts::Adapter for $adapter {
            fn id(&self) -> &contracts::AdapterId {
                self.state.id()
            }

            fn subscribed_keys(&self) -> Option<contracts::KeySet> {
                self.subscribed.clone()
            }

            fn produced_keys(&self) -> contracts::KeySet {
                self.produced.clone()
            }

            fn enabled(&self) -> bool {
                self.state.is_enabled()
            }

            fn set_enabled(&self, enabled: bool) {
                if self.state.swap_enabled(enabled) != enabled {
                    tracing::debug!(adapter = %self.state.id(), enabled, "adapter state changed");
                    self.on_enabled_changed(enabled);
                }
            }

            fn auto_start(&self) -> bool {
                self.state.settings().auto_start
            }

            fn respect_input_demand(&self) -> bool {
                self.state.settings().respect_input_demand
            }

            fn respect_output_demand(&self) -> bool {
                self.state.settings().respect_output_demand
            }

            fn dependency_names(&self) -> Vec<String> {
                self.state.settings().dependencies.clone()
            }

            fn dependency_timeout(&self) -> Option<std::time::Duration> {
                self.state.settings().dependency_timeout
            }

            fn requested_input_keys(&self) -> Option<contracts::KeySet> {
                self.state.requested_input()
            }

            fn set_requested_input_keys(&self, keys: Option<contracts::KeySet>) {
                self.state.set_requested_input(keys);
            }

            fn requested_output_keys(&self) -> Option<contracts::KeySet> {
                self.state.requested_output()
            }

            fn set_requested_output_keys(&self, keys: Option<contracts::KeySet>) {
                self.state.set_requested_output(keys);
            }
        }
    };
}

pub(crate) use impl_adapter;
