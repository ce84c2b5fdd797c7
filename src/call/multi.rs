use indexmap::IndexMap;

use crate::agent::AgentClient;
use crate::extract::extract;
use crate::value::Value;
use crate::{Error, Result};

/// Reads one structured attribute and extracts several output fields from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiValueCall {
    pub(crate) attribute: String,
    pub(crate) path: Option<String>,
    pub(crate) fields: Vec<String>,
}

impl MultiValueCall {
    pub(crate) async fn execute(
        &self,
        client: &dyn AgentClient,
        object_name: &str,
    ) -> Result<IndexMap<String, Value>> {
        let value = client.read_attribute(object_name, &self.attribute).await?;
        let mut results = IndexMap::new();

        // A scalar can only satisfy the first field
        if !value.is_structured() {
            if self.fields.len() > 1 {
                tracing::warn!(
                    attribute = %self.attribute,
                    "attribute is not structured; only the first output field is set"
                );
            }
            if let Some(first) = self.fields.first() {
                results.insert(first.clone(), value);
            }
            return Ok(results);
        }

        for field in &self.fields {
            let path = match &self.path {
                Some(prefix) => format!("{prefix}.{field}"),
                None => field.clone(),
            };
            match extract(&value, &path) {
                Ok(v) => {
                    results.insert(field.clone(), v.clone());
                }
                Err(e) => {
                    tracing::warn!(attribute = %self.attribute, field = %field, error = %e, "output field not found in attribute");
                }
            }
        }

        if results.is_empty() {
            return Err(Error::Query(format!(
                "none of the output fields were found in attribute {}",
                self.attribute
            )));
        }

        Ok(results)
    }

    pub(crate) fn description(&self) -> String {
        format!(
            "multi-value attribute {} ({})",
            self.attribute,
            self.fields.join(", ")
        )
    }
}
