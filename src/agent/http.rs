//! HTTP/JSON bridge to managed agents
//!
//! Speaks the Jolokia request format: every read or invocation is a JSON
//! request POSTed to `http://host:port/jolokia`, answered by an envelope
//! carrying either `value` or `error` alongside a `status` code. Composite
//! values come back as JSON objects and map onto [`Value::Record`].
//!
//! The bridge does not say which objects are tables: tabular data arrives as
//! an object keyed by row index, so it also becomes a record. A single-column
//! index such as `[Code Cache].used` still resolves because the bracketed
//! token is looked up as a field name. Composite indexes arrive as one nested
//! object per column and have to be addressed one component at a time
//! (`key1.key2.field`); `[key1,key2]` does not match.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{AgentClient, AgentConnector};
use crate::descriptor::{Credentials, Target};
use crate::value::Value;
use crate::{Error, Result};

const DEFAULT_PATH: &str = "jolokia";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector for agents exposing an HTTP/JSON bridge
#[derive(Clone)]
pub struct HttpAgentConnector {
    client: reqwest::Client,
    path: String,
}

impl HttpAgentConnector {
    /// Create a connector using the default bridge path
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            path: DEFAULT_PATH.to_string(),
        })
    }

    /// Serve requests under a different path than `/jolokia`
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.trim_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: u16,
    #[serde(default)]
    value: serde_json::Value,
    error: Option<String>,
}

#[async_trait]
impl AgentConnector for HttpAgentConnector {
    async fn connect(
        &self,
        target: &Target,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn AgentClient>> {
        let client = HttpAgentClient {
            http: self.client.clone(),
            url: format!("http://{}:{}/{}", target.host, target.port, self.path),
            credentials: credentials.cloned(),
        };

        tracing::debug!(url = %client.url, "connecting to agent");

        // The bridge is stateless; probing the version endpoint verifies the
        // agent is reachable and the credentials are accepted.
        let response = client
            .authorized(client.http.get(format!("{}/version", client.url)))
            .send()
            .await
            .map_err(|e| Error::Connection(format!("{target}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Connection(format!("{target}: authentication failed")));
        }
        if !status.is_success() {
            return Err(Error::Connection(format!("{target}: agent answered {status}")));
        }

        Ok(Box::new(client))
    }
}

struct HttpAgentClient {
    http: reqwest::Client,
    url: String,
    credentials: Option<Credentials>,
}

impl HttpAgentClient {
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }

    async fn send(&self, body: serde_json::Value) -> Result<Value> {
        let response = self
            .authorized(self.http.post(&self.url).json(&body))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Connection(format!("agent answered {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::Query(format!("malformed agent response: {e}")))?;

        if envelope.status != 200 {
            return Err(Error::Query(envelope.error.unwrap_or_else(|| {
                format!("request failed with status {}", envelope.status)
            })));
        }

        Ok(envelope.value.into())
    }
}

/// Operation name as addressed on the bridge; overloaded operations carry
/// their signature
fn signature(operation: &str, param_types: &[String]) -> String {
    if param_types.is_empty() {
        operation.to_string()
    } else {
        format!("{operation}({})", param_types.join(","))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn read_attribute(&self, object_name: &str, attribute: &str) -> Result<Value> {
        self.send(serde_json::json!({
            "type": "read",
            "mbean": object_name,
            "attribute": attribute,
        }))
        .await
    }

    async fn invoke(
        &self,
        object_name: &str,
        operation: &str,
        params: &[String],
        param_types: &[String],
    ) -> Result<Value> {
        self.send(serde_json::json!({
            "type": "exec",
            "mbean": object_name,
            "operation": signature(operation, param_types),
            "arguments": params,
        }))
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;

    #[test]
    fn signature_includes_types_when_declared() {
        assert_eq!(signature("reset", &[]), "reset");
        assert_eq!(
            signature("dump", &["int".to_string(), "java.lang.String".to_string()]),
            "dump(int,java.lang.String)"
        );
    }

    #[test]
    fn parses_error_envelope() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"status":404,"error_type":"javax.management.InstanceNotFoundException","error":"no such object"}"#,
        )
        .unwrap();
        assert_eq!(envelope.status, 404);
        assert_eq!(envelope.error.as_deref(), Some("no such object"));
        assert!(envelope.value.is_null());
    }

    #[test]
    fn tabular_objects_resolve_by_field_name() {
        let value: Value = serde_json::json!({
            "Code Cache": {"used": 3, "committed": 4},
            "G1 Eden": {"used": 7, "committed": 9},
            "byHeap": {"true": {"G1 Old": {"used": 11}}}
        })
        .into();

        assert!(matches!(value, Value::Record(_)));
        assert_eq!(extract(&value, "[Code Cache].used"), Ok(&Value::Int(3)));
        assert_eq!(extract(&value, "G1 Eden.committed"), Ok(&Value::Int(9)));
        assert_eq!(extract(&value, "byHeap.true.G1 Old.used"), Ok(&Value::Int(11)));
        assert!(extract(&value, "byHeap.[true,G1 Old].used").is_err());
    }

    #[test]
    fn custom_path_is_trimmed() {
        let connector = HttpAgentConnector::new().unwrap().with_path("/bridge/");
        assert_eq!(connector.path, "bridge");
    }
}
