use indexmap::IndexMap;

use crate::Result;
use crate::agent::AgentClient;
use crate::value::Value;

/// Invokes an operation and marshals its response onto the output fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationCall {
    pub(crate) operation: String,
    pub(crate) params: Vec<String>,
    pub(crate) param_types: Vec<String>,
    pub(crate) fields: Vec<String>,
}

impl OperationCall {
    pub(crate) async fn execute(
        &self,
        client: &dyn AgentClient,
        object_name: &str,
    ) -> Result<IndexMap<String, Value>> {
        let response = client
            .invoke(object_name, &self.operation, &self.params, &self.param_types)
            .await?;
        Ok(self.marshal(response))
    }

    /// Map an operation response onto the output fields
    ///
    /// Lists and table rows are assigned positionally, records by field name,
    /// and a scalar fills the first field.
    pub(crate) fn marshal(&self, response: Value) -> IndexMap<String, Value> {
        match response {
            Value::List(items) => self.positional(items),
            Value::Table(table) => {
                self.positional(table.rows().iter().cloned().map(Value::Record).collect())
            }
            Value::Record(record) => {
                let mut results = IndexMap::new();
                for field in &self.fields {
                    match record.get(field) {
                        Some(value) => {
                            results.insert(field.clone(), value.clone());
                        }
                        None => {
                            tracing::warn!(operation = %self.operation, field = %field, "field missing from operation response");
                        }
                    }
                }
                results
            }
            scalar => self.positional(vec![scalar]),
        }
    }

    fn positional(&self, items: Vec<Value>) -> IndexMap<String, Value> {
        if items.len() < self.fields.len() {
            tracing::warn!(
                operation = %self.operation,
                expected = self.fields.len(),
                actual = items.len(),
                "insufficient operation result size; trailing fields left unset"
            );
        } else if items.len() > self.fields.len() {
            tracing::debug!(
                operation = %self.operation,
                dropped = items.len() - self.fields.len(),
                "dropping extra operation results"
            );
        }

        self.fields.iter().cloned().zip(items).collect()
    }

    pub(crate) fn description(&self) -> String {
        format!("operation {}({})", self.operation, self.param_types.join(","))
    }
}
