//! Test doubles for plugin instances and the local task port
//!
//! Every mock shares its state through `Arc`s, so a clone handed to the
//! code under test can still be inspected from the test body.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pulse_core::models::{ConfigMap, StagePayload, TaskDefinition, TaskId};
use pulse_core::{LocalTaskPort, PluginInstance, PulseError, PulseResult};

/// Collector that fills every requested metric with `1`
///
/// Latency and failure can be changed while a task is running.
#[derive(Debug, Clone, Default)]
pub struct MockCollector {
    delay_ms: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginInstance for MockCollector {
    async fn run(&self, input: StagePayload, _config: &ConfigMap) -> PulseResult<StagePayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PulseError::RunFailure("mock collector failure".to_string()));
        }
        Ok(input
            .into_iter()
            .map(|mut metric| {
                metric.value = serde_json::json!(1);
                metric
            })
            .collect())
    }
}

/// Publisher that records every payload it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    received: Arc<Mutex<Vec<StagePayload>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<StagePayload> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl PluginInstance for RecordingPublisher {
    async fn run(&self, input: StagePayload, _config: &ConfigMap) -> PulseResult<StagePayload> {
        self.received.lock().unwrap().push(input.clone());
        Ok(input)
    }
}

/// In-memory [`LocalTaskPort`] that tracks task origins like the real task manager
#[derive(Debug, Clone, Default)]
pub struct MockTaskPort {
    local: Arc<Mutex<HashMap<TaskId, TaskDefinition>>>,
    adopted: Arc<Mutex<HashMap<TaskId, (TaskDefinition, BTreeSet<String>)>>>,
    released: Arc<Mutex<Vec<(TaskId, String)>>>,
    fail_adopt: Arc<AtomicBool>,
}

impl MockTaskPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locally created task so that `describe` can find it
    pub fn with_local(self, definition: TaskDefinition) -> Self {
        self.local
            .lock()
            .unwrap()
            .insert(definition.id.clone(), definition);
        self
    }

    pub fn set_fail_adopt(&self, fail: bool) {
        self.fail_adopt.store(fail, Ordering::SeqCst);
    }

    pub fn is_adopted(&self, id: &TaskId) -> bool {
        self.adopted.lock().unwrap().contains_key(id)
    }

    pub fn adopted_definition(&self, id: &TaskId) -> Option<TaskDefinition> {
        self.adopted
            .lock()
            .unwrap()
            .get(id)
            .map(|(definition, _)| definition.clone())
    }

    pub fn released(&self) -> Vec<(TaskId, String)> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalTaskPort for MockTaskPort {
    async fn describe(&self, id: &TaskId) -> PulseResult<TaskDefinition> {
        if let Some(definition) = self.local.lock().unwrap().get(id) {
            return Ok(definition.clone());
        }
        self.adopted
            .lock()
            .unwrap()
            .get(id)
            .map(|(definition, _)| definition.clone())
            .ok_or_else(|| PulseError::task_not_found(id))
    }

    async fn adopt(&self, definition: TaskDefinition, agreement: &str) -> PulseResult<()> {
        if self.fail_adopt.load(Ordering::SeqCst) {
            return Err(PulseError::validation("plugin not loadable"));
        }
        let mut adopted = self.adopted.lock().unwrap();
        let entry = adopted
            .entry(definition.id.clone())
            .or_insert_with(|| (definition.clone(), BTreeSet::new()));
        entry.0 = definition;
        entry.1.insert(agreement.to_string());
        Ok(())
    }

    async fn release(&self, id: &TaskId, agreement: &str) -> PulseResult<()> {
        let mut adopted = self.adopted.lock().unwrap();
        if let Some((_, origins)) = adopted.get_mut(id) {
            if origins.remove(agreement) {
                self.released
                    .lock()
                    .unwrap()
                    .push((id.clone(), agreement.to_string()));
            }
            if origins.is_empty() {
                adopted.remove(id);
            }
        }
        Ok(())
    }
}
