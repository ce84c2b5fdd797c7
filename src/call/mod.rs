//! Calls against managed agents
//!
//! A [`Call`] is built from one validated [`Descriptor`] by [`CallFactory`]
//! and comes in three variants:
//!
//! - operation invocation, when the descriptor names an operation
//! - single-value attribute read, for exactly one output field
//! - multi-value attribute read, for several output fields
//!
//! Calls are immutable once built and keyed by [`CallKey`] for deduplication.

mod key;
mod multi;
mod operation;
mod single;
mod summary;

use std::time::Instant;

use indexmap::IndexMap;

pub use key::CallKey;
pub use multi::MultiValueCall;
pub use operation::OperationCall;
pub use single::SingleValueCall;
pub use summary::Summary;

use crate::agent::{AgentClient, AgentConnector};
use crate::descriptor::{Descriptor, Query, RawDescriptor};
use crate::value::Value;
use crate::{Error, Result};

/// Variant-specific part of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    Operation(OperationCall),
    SingleValue(SingleValueCall),
    MultiValue(MultiValueCall),
}

/// One unit of collection work
#[derive(Debug, Clone)]
pub struct Call {
    key: CallKey,
    descriptor: Descriptor,
    kind: CallKind,
}

impl Call {
    #[must_use]
    pub const fn key(&self) -> &CallKey {
        &self.key
    }

    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn kind(&self) -> &CallKind {
        &self.kind
    }

    /// Human-readable description of what this call does
    #[must_use]
    pub fn description(&self) -> String {
        match &self.kind {
            CallKind::Operation(c) => c.description(),
            CallKind::SingleValue(c) => c.description(),
            CallKind::MultiValue(c) => c.description(),
        }
    }

    /// Summary shell for this call, without results
    #[must_use]
    pub fn blank_summary(&self) -> Summary {
        Summary::new(&self.descriptor, self.key.short_id(), self.description())
    }

    /// Run the call on an already connected agent
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] or [`Error::Extract`] if the agent rejects the
    /// request or a value path cannot be walked, and [`Error::Connection`] if
    /// the connection fails mid-call.
    pub async fn execute(&self, client: &dyn AgentClient) -> Result<Summary> {
        let started = Instant::now();
        let object_name = self.descriptor.object_name.as_str();

        let results: IndexMap<String, Value> = match &self.kind {
            CallKind::Operation(c) => c.execute(client, object_name).await?,
            CallKind::SingleValue(c) => c.execute(client, object_name).await?,
            CallKind::MultiValue(c) => c.execute(client, object_name).await?,
        };

        let mut summary = self.blank_summary();
        summary.results = results;
        summary.runtime = started.elapsed();

        tracing::debug!(
            call_id = %summary.call_id,
            runtime_ms = summary.runtime.as_millis(),
            fields = summary.results.len(),
            "call completed"
        );

        Ok(summary)
    }

    /// Connect to the descriptor's agent, execute, and close
    ///
    /// A failure to close is logged and does not fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the agent cannot be reached, otherwise
    /// whatever [`Call::execute`] returns.
    pub async fn run(&self, connector: &dyn AgentConnector) -> Result<Summary> {
        let client = connector
            .connect(&self.descriptor.target, self.descriptor.credentials.as_ref())
            .await
            .map_err(|e| match e {
                Error::Connection(_) => e,
                other => Error::Connection(other.to_string()),
            })?;

        let outcome = self.execute(client.as_ref()).await;

        if let Err(e) = client.close().await {
            tracing::warn!(call_id = %self.key, error = %e, "failed to close agent connection");
        }

        outcome
    }
}

/// Builds calls from descriptors
pub struct CallFactory;

impl CallFactory {
    /// Pick the call variant for a validated descriptor
    ///
    /// An operation name wins over an attribute name; an attribute read with
    /// one output field is single-valued, with more it is multi-valued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the descriptor declares no output fields.
    pub fn create(descriptor: Descriptor) -> Result<Call> {
        if descriptor.output_fields.is_empty() {
            return Err(Error::Config(format!(
                "data source '{}': no output fields defined",
                descriptor.data_source_id
            )));
        }

        let kind = match &descriptor.query {
            Query::Operation {
                name,
                params,
                param_types,
            } => CallKind::Operation(OperationCall {
                operation: name.clone(),
                params: params.clone(),
                param_types: param_types.clone(),
                fields: descriptor.output_fields.clone(),
            }),
            Query::Attribute { name, path } if descriptor.output_fields.len() == 1 => {
                CallKind::SingleValue(SingleValueCall {
                    attribute: name.clone(),
                    path: path.clone(),
                    field: descriptor.output_fields[0].clone(),
                })
            }
            Query::Attribute { name, path } => CallKind::MultiValue(MultiValueCall {
                attribute: name.clone(),
                path: path.clone(),
                fields: descriptor.output_fields.clone(),
            }),
        };

        Ok(Call {
            key: CallKey::for_descriptor(&descriptor),
            descriptor,
            kind,
        })
    }

    /// Validate a raw descriptor and build its call
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the descriptor is malformed.
    pub fn from_raw(raw: RawDescriptor) -> Result<Call> {
        Self::create(Descriptor::try_from(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryAgent;
    use crate::value::{Record, Table};

    const MEMORY: &str = "java.lang:type=Memory";

    fn raw(attribute: &str, dps: &[&str]) -> RawDescriptor {
        RawDescriptor {
            device: Some("app1".to_string()),
            port: Some("9999".to_string()),
            id: Some("heap".to_string()),
            object_name: Some(MEMORY.to_string()),
            attribute_name: Some(attribute.to_string()),
            dps: dps.iter().map(ToString::to_string).collect(),
            ..RawDescriptor::default()
        }
    }

    fn usage() -> Record {
        Record::new()
            .with("init", 0)
            .with("used", 10)
            .with("committed", 20)
            .with("max", -1)
    }

    #[test]
    fn factory_picks_variant() {
        let single = CallFactory::from_raw(raw("HeapMemoryUsage", &["used"])).unwrap();
        assert!(matches!(single.kind(), CallKind::SingleValue(_)));

        let multi = CallFactory::from_raw(raw("HeapMemoryUsage", &["used", "max"])).unwrap();
        assert!(matches!(multi.kind(), CallKind::MultiValue(_)));

        let op = CallFactory::from_raw(RawDescriptor {
            operation_name: Some("gc".to_string()),
            ..raw("HeapMemoryUsage", &["used"])
        })
        .unwrap();
        assert!(matches!(op.kind(), CallKind::Operation(_)));
    }

    #[test]
    fn factory_rejects_empty_output_fields() {
        let err = CallFactory::from_raw(raw("HeapMemoryUsage", &[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn single_value_scalar_attribute() {
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "ObjectPendingFinalizationCount", 3);
        let call = CallFactory::from_raw(raw("ObjectPendingFinalizationCount", &["pending"])).unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results["pending"], Value::Int(3));
        assert_eq!(agent.close_count(), 1);
    }

    #[tokio::test]
    async fn single_value_structured_attribute_uses_field_name() {
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "HeapMemoryUsage", usage());
        let call = CallFactory::from_raw(raw("HeapMemoryUsage", &["committed"])).unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results["committed"], Value::Int(20));
    }

    #[tokio::test]
    async fn single_value_uses_attribute_path() {
        let table = Table::new(["key"])
            .with_row(Record::new().with("key", "Code Cache").with("value", usage()));
        let info = Record::new().with("memoryUsageAfterGc", table);
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "LastGcInfo", info);
        let call = CallFactory::from_raw(RawDescriptor {
            attribute_path: Some("memoryUsageAfterGc.[Code Cache].used".to_string()),
            ..raw("LastGcInfo", &["codeCacheUsed"])
        })
        .unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results["codeCacheUsed"], Value::Int(10));
    }

    #[tokio::test]
    async fn multi_value_skips_missing_fields() {
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "HeapMemoryUsage", usage());
        let call = CallFactory::from_raw(raw("HeapMemoryUsage", &["used", "bogus", "max"])).unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results["max"], Value::Int(-1));
        assert!(!summary.results.contains_key("bogus"));
    }

    #[tokio::test]
    async fn multi_value_scalar_sets_first_field() {
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "Verbose", false);
        let call = CallFactory::from_raw(raw("Verbose", &["verbose", "other"])).unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results.len(), 1);
        assert_eq!(summary.results["verbose"], Value::Bool(false));
    }

    #[tokio::test]
    async fn missing_attribute_is_query_error() {
        let agent = InMemoryAgent::new().with_attribute(MEMORY, "HeapMemoryUsage", usage());
        let call = CallFactory::from_raw(raw("NonHeapMemoryUsage", &["used"])).unwrap();
        let err = call.run(&agent).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Query);
    }

    #[tokio::test]
    async fn unreachable_agent_is_connection_error() {
        let agent = InMemoryAgent::new();
        agent.refuse_connections(true);
        let call = CallFactory::from_raw(raw("HeapMemoryUsage", &["used"])).unwrap();
        let err = call.run(&agent).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn operation_passes_parameters() {
        let agent = InMemoryAgent::new().with_operation(MEMORY, "poolStats", Value::List(vec![4.into(), 5.into()]));
        let call = CallFactory::from_raw(RawDescriptor {
            operation_name: Some("poolStats".to_string()),
            operation_param_values: Some("eden,1".to_string()),
            operation_param_types: Some("java.lang.String,int".to_string()),
            ..raw("", &["x", "y"])
        })
        .unwrap();
        let summary = call.run(&agent).await.unwrap();
        assert_eq!(summary.results["x"], Value::Int(4));
        assert_eq!(summary.results["y"], Value::Int(5));
        assert_eq!(
            agent.invocations(),
            vec![("poolStats".to_string(), vec!["eden".to_string(), "1".to_string()])]
        );
    }
}
