//! Managed-agent transport
//!
//! The collector never speaks a management protocol directly. It connects
//! through an [`AgentConnector`] and issues reads and invocations on the
//! returned [`AgentClient`]; everything past that seam is a thin I/O wrapper.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::Result;
use crate::descriptor::{Credentials, Target};
use crate::value::Value;

pub use http::HttpAgentConnector;
pub use memory::InMemoryAgent;

/// Opens connections to managed agents
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Connect (and authenticate, when credentials are given) to `target`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the agent is unreachable or
    /// rejects the credentials.
    async fn connect(
        &self,
        target: &Target,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn AgentClient>>;
}

/// A live connection to one managed agent
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Read one attribute of a managed object
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Query`] if the object or attribute does not
    /// exist, or [`crate::Error::Connection`] if the connection dropped.
    async fn read_attribute(&self, object_name: &str, attribute: &str) -> Result<Value>;

    /// Invoke an operation on a managed object
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Query`] if the object or operation does not
    /// exist or the invocation fails remotely.
    async fn invoke(
        &self,
        object_name: &str,
        operation: &str,
        params: &[String],
        param_types: &[String],
    ) -> Result<Value>;

    /// Release the connection
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the close handshake fails.
    async fn close(&self) -> Result<()>;
}
