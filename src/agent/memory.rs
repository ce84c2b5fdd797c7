//! In-process agent backed by a table of managed objects
//!
//! Useful as a loopback target and as the agent behind the test suites:
//! attributes and operation responses are registered up front, and latency or
//! connection refusal can be injected per object member.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentClient, AgentConnector};
use crate::descriptor::{Credentials, Target};
use crate::value::Value;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct ManagedObject {
    attributes: HashMap<String, Value>,
    operations: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct AgentState {
    objects: RwLock<HashMap<String, ManagedObject>>,
    latency: RwLock<HashMap<(String, String), Duration>>,
    close_latency: RwLock<Option<Duration>>,
    credentials: RwLock<Option<Credentials>>,
    invocations: RwLock<Vec<(String, Vec<String>)>>,
    refuse: AtomicBool,
    connects: AtomicUsize,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

/// Agent whose managed objects live in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryAgent {
    state: Arc<AgentState>,
}

impl InMemoryAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute value
    #[must_use]
    pub fn with_attribute(self, object: &str, attribute: &str, value: impl Into<Value>) -> Self {
        self.set_attribute(object, attribute, value);
        self
    }

    /// Register the response an operation returns
    #[must_use]
    pub fn with_operation(self, object: &str, operation: &str, response: impl Into<Value>) -> Self {
        self.state
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(object.to_string())
            .or_default()
            .operations
            .insert(operation.to_string(), response.into());
        self
    }

    /// Require these credentials on connect
    #[must_use]
    pub fn with_credentials(self, username: &str, password: &str) -> Self {
        *self
            .state
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Delay every read or invocation of `member` on `object`
    #[must_use]
    pub fn with_latency(self, object: &str, member: &str, latency: Duration) -> Self {
        self.set_latency(object, member, latency);
        self
    }

    /// Delay closing a connection
    #[must_use]
    pub fn with_close_latency(self, latency: Duration) -> Self {
        *self
            .state
            .close_latency
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(latency);
        self
    }

    pub fn set_attribute(&self, object: &str, attribute: &str, value: impl Into<Value>) {
        self.state
            .objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(object.to_string())
            .or_default()
            .attributes
            .insert(attribute.to_string(), value.into());
    }

    pub fn set_latency(&self, object: &str, member: &str, latency: Duration) {
        self.state
            .latency
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((object.to_string(), member.to_string()), latency);
    }

    /// Refuse (or accept again) new connections
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Operations invoked so far, with their parameters
    #[must_use]
    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        self.state
            .invocations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AgentConnector for InMemoryAgent {
    async fn connect(
        &self,
        target: &Target,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn AgentClient>> {
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection(format!("connection refused by {target}")));
        }

        let required = self
            .state
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(required) = required {
            if credentials != Some(&required) {
                return Err(Error::Connection(format!("authentication failed for {target}")));
            }
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryClient {
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemoryClient {
    state: Arc<AgentState>,
}

impl InMemoryClient {
    async fn delay(&self, object: &str, member: &str) {
        let latency = self
            .state
            .latency
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(object.to_string(), member.to_string()))
            .copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl AgentClient for InMemoryClient {
    async fn read_attribute(&self, object_name: &str, attribute: &str) -> Result<Value> {
        self.delay(object_name, attribute).await;
        self.state.reads.fetch_add(1, Ordering::SeqCst);

        let objects = self.state.objects.read().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(object_name)
            .ok_or_else(|| Error::Query(format!("no managed object registered with name: {object_name}")))?;
        object.attributes.get(attribute).cloned().ok_or_else(|| {
            Error::Query(format!(
                "error occurred while accessing attribute '{attribute}' on object '{object_name}'"
            ))
        })
    }

    async fn invoke(
        &self,
        object_name: &str,
        operation: &str,
        params: &[String],
        _param_types: &[String],
    ) -> Result<Value> {
        self.delay(object_name, operation).await;
        self.state
            .invocations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((operation.to_string(), params.to_vec()));

        let objects = self.state.objects.read().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .get(object_name)
            .ok_or_else(|| Error::Query(format!("no managed object registered with name: {object_name}")))?;
        object
            .operations
            .get(operation)
            .cloned()
            .ok_or_else(|| Error::Query(format!("error occurred while invoking '{operation}'")))
    }

    async fn close(&self) -> Result<()> {
        let latency = *self
            .state
            .close_latency
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
