//! Controller seam
//!
//! The controller owns the descriptor inventory and the cycle settings, and
//! receives heartbeats. Results and failures go to a [`ResultSink`], which in
//! production is the same controller.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::call::Summary;
use crate::descriptor::RawDescriptor;
use crate::report::Failure;

pub use http::HttpController;

/// Descriptor kind requested from the controller
pub const DESCRIPTOR_KIND: &str = "JMX";

/// Cycle settings published by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleConfig {
    pub sampling_interval_seconds: u64,
    pub descriptor_refresh_interval_minutes: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            sampling_interval_seconds: 300,
            descriptor_refresh_interval_minutes: 20,
        }
    }
}

/// Liveness signal sent after every completed collection cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub device: String,
    pub component: String,

    /// How long the controller should wait for the next heartbeat
    pub timeout_seconds: u64,
}

/// Source of descriptors and cycle settings
#[async_trait]
pub trait Controller: Send + Sync {
    /// Fetch the current descriptor inventory for a collector
    async fn fetch_descriptors(&self, collector: &str, kind: &str) -> Result<Vec<RawDescriptor>>;

    /// Fetch the cycle settings for a collector
    async fn fetch_cycle_config(&self, collector: &str) -> Result<CycleConfig>;

    async fn post_heartbeat(&self, heartbeat: &Heartbeat) -> Result<()>;
}

/// Destination for call outcomes
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn post_summary(&self, summary: &Summary) -> Result<()>;

    async fn post_failure(&self, failure: &Failure) -> Result<()>;
}
