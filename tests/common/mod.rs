//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mbean_collector::controller::{Controller, CycleConfig, Heartbeat, ResultSink};
use mbean_collector::{Error, Failure, RawDescriptor, Result, Summary};

pub const MEMORY: &str = "java.lang:type=Memory";
pub const THREADING: &str = "java.lang:type=Threading";

/// Controller and result sink that records everything posted to it
#[derive(Default)]
pub struct RecordingController {
    descriptors: Mutex<Vec<RawDescriptor>>,
    cycle: Mutex<CycleConfig>,
    unreachable: Mutex<bool>,
    heartbeats: Mutex<Vec<Heartbeat>>,
    summaries: Mutex<Vec<Summary>>,
    failures: Mutex<Vec<Failure>>,
}

impl RecordingController {
    #[must_use]
    pub fn new(descriptors: Vec<RawDescriptor>) -> Self {
        let controller = Self::default();
        controller.set_descriptors(descriptors);
        controller
    }

    pub fn set_descriptors(&self, descriptors: Vec<RawDescriptor>) {
        *lock(&self.descriptors) = descriptors;
    }

    pub fn set_cycle(&self, cycle: CycleConfig) {
        *lock(&self.cycle) = cycle;
    }

    /// Fail every descriptor and config fetch
    pub fn set_unreachable(&self, unreachable: bool) {
        *lock(&self.unreachable) = unreachable;
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        lock(&self.heartbeats).clone()
    }

    pub fn summaries(&self) -> Vec<Summary> {
        lock(&self.summaries).clone()
    }

    pub fn failures(&self) -> Vec<Failure> {
        lock(&self.failures).clone()
    }

    /// Data source ids of every posted summary
    pub fn summary_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.summaries)
            .iter()
            .map(|s| s.data_source_id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn check_reachable(&self) -> Result<()> {
        if *lock(&self.unreachable) {
            return Err(Error::Controller("controller unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Controller for RecordingController {
    async fn fetch_descriptors(&self, _collector: &str, _kind: &str) -> Result<Vec<RawDescriptor>> {
        self.check_reachable()?;
        Ok(lock(&self.descriptors).clone())
    }

    async fn fetch_cycle_config(&self, _collector: &str) -> Result<CycleConfig> {
        self.check_reachable()?;
        Ok(*lock(&self.cycle))
    }

    async fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()> {
        lock(&self.heartbeats).push(heartbeat.clone());
        Ok(())
    }
}

#[async_trait]
impl ResultSink for RecordingController {
    async fn post_summary(&self, summary: &Summary) -> Result<()> {
        lock(&self.summaries).push(summary.clone());
        Ok(())
    }

    async fn post_failure(&self, failure: &Failure) -> Result<()> {
        lock(&self.failures).push(failure.clone());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Attribute descriptor against `app1:9999`
#[must_use]
pub fn attribute(id: &str, object: &str, attribute: &str, dps: &[&str]) -> RawDescriptor {
    RawDescriptor {
        device: Some("app1".to_string()),
        port: Some("9999".to_string()),
        id: Some(id.to_string()),
        object_name: Some(object.to_string()),
        attribute_name: Some(attribute.to_string()),
        dps: dps.iter().map(ToString::to_string).collect(),
        ..RawDescriptor::default()
    }
}

/// Operation descriptor against `app1:9999`
#[must_use]
pub fn operation(
    id: &str,
    object: &str,
    operation: &str,
    params: &str,
    types: &str,
    dps: &[&str],
) -> RawDescriptor {
    RawDescriptor {
        device: Some("app1".to_string()),
        port: Some("9999".to_string()),
        id: Some(id.to_string()),
        object_name: Some(object.to_string()),
        operation_name: Some(operation.to_string()),
        operation_param_values: Some(params.to_string()),
        operation_param_types: Some(types.to_string()),
        dps: dps.iter().map(ToString::to_string).collect(),
        ..RawDescriptor::default()
    }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
