use indexmap::IndexMap;

use crate::Result;
use crate::agent::AgentClient;
use crate::extract::extract;
use crate::value::Value;

/// Reads one attribute into exactly one output field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleValueCall {
    pub(crate) attribute: String,
    pub(crate) path: Option<String>,
    pub(crate) field: String,
}

impl SingleValueCall {
    /// Read the attribute; a structured value is walked with the configured
    /// path, or with the output field name when no path is configured
    pub(crate) async fn execute(
        &self,
        client: &dyn AgentClient,
        object_name: &str,
    ) -> Result<IndexMap<String, Value>> {
        let value = client.read_attribute(object_name, &self.attribute).await?;

        let value = match (&self.path, value.is_structured()) {
            (Some(path), _) => extract(&value, path)?.clone(),
            (None, true) => extract(&value, &self.field)?.clone(),
            (None, false) => value,
        };

        Ok(IndexMap::from([(self.field.clone(), value)]))
    }

    pub(crate) fn description(&self) -> String {
        match &self.path {
            Some(path) => format!("single-value attribute {} ({path})", self.attribute),
            None => format!("single-value attribute {}", self.attribute),
        }
    }
}
