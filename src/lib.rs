//! MBean Collector - metrics collection from remote management agents
//!
//! This library provides the pieces of the collector:
//! - Descriptor validation and value-path extraction
//! - Call variants (single attribute, multi attribute, operation invocation)
//! - A periodic dispatcher with in-flight deduplication and bounded pools
//! - A one-shot collection facade behind an HTTP listener
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Controller                        │
//! │   descriptors  │  cycle config  │  results  │ events │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 MBean Collector                      │
//! │   Dispatcher  │  Collector  │  Calls  │  Extractor  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Management Agents                      │
//! │   attributes  │  operations                         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod api;
pub mod call;
pub mod collector;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod report;
pub mod value;

pub use agent::{AgentClient, AgentConnector, HttpAgentConnector, InMemoryAgent};
pub use call::{Call, CallFactory, CallKey, Summary};
pub use collector::{Collector, CollectorSettings};
pub use config::Config;
pub use controller::{Controller, CycleConfig, Heartbeat, HttpController, ResultSink};
pub use descriptor::{Descriptor, RawDescriptor};
pub use dispatch::{BatchHandle, Dispatcher, DispatcherConfig, InFlightSet};
pub use error::{Error, ErrorClass, Result};
pub use extract::extract;
pub use report::{Entry, Failure, Sample, SampleValue, ValueEntry};
pub use value::{Record, Table, Value};
