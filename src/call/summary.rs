//! Outcome of a successful call

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::descriptor::Descriptor;
use crate::report::{Entry, Sample, SampleValue, ValueEntry};
use crate::value::Value;

/// Type hint whose values are posted as raw text
const COUNTER: &str = "COUNTER";

/// Results of one call, keyed by output field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub device: String,
    pub component: Option<String>,
    pub data_source_id: String,
    pub call_id: String,
    pub object_name: String,

    /// Human-readable description of what was called
    pub call_summary: String,

    pub results: IndexMap<String, Value>,

    /// Type hint per output field, padded to the field count
    pub type_map: IndexMap<String, String>,

    #[serde(serialize_with = "as_millis")]
    pub runtime: Duration,
    pub cancelled: bool,
    pub collected_at: DateTime<Utc>,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

impl Summary {
    /// Empty summary for a call about to run against `descriptor`
    #[must_use]
    pub fn new(descriptor: &Descriptor, call_id: String, call_summary: String) -> Self {
        let type_map = descriptor
            .output_fields
            .iter()
            .cloned()
            .zip(descriptor.type_hints.iter().cloned().chain(std::iter::repeat(String::new())))
            .collect();

        Self {
            device: descriptor.device.clone(),
            component: descriptor.component.clone(),
            data_source_id: descriptor.data_source_id.clone(),
            call_id,
            object_name: descriptor.object_name.clone(),
            call_summary,
            results: IndexMap::new(),
            type_map,
            runtime: Duration::ZERO,
            cancelled: false,
            collected_at: Utc::now(),
        }
    }

    /// Mark the call as abandoned before it produced results
    #[must_use]
    pub fn into_cancelled(mut self) -> Self {
        self.cancelled = true;
        self.results.clear();
        self
    }

    /// Data points to post for this summary
    ///
    /// Null results are skipped with a warning. Fields hinted as counters (or with no hint)
    /// are posted as raw text; any other hint requires a numeric value, and a
    /// non-numeric one is skipped with a warning.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        self.results
            .iter()
            .filter_map(|(field, value)| {
                if value.is_null() {
                    tracing::warn!(call_id = %self.call_id, field = %field, "no value for field; skipping");
                    return None;
                }
                let hint = self.type_map.get(field).map_or("", String::as_str);
                let value = if hint.is_empty() || hint.eq_ignore_ascii_case(COUNTER) {
                    SampleValue::Raw(value.to_string())
                } else if let Some(number) = value.as_f64() {
                    SampleValue::Gauge(number)
                } else {
                    tracing::warn!(
                        call_id = %self.call_id,
                        field = %field,
                        %value,
                        hint,
                        "value is not numeric; skipping"
                    );
                    return None;
                };

                Some(Sample {
                    device: self.device.clone(),
                    component: self.component.clone(),
                    data_point: format!("{}_{field}", self.data_source_id),
                    value,
                })
            })
            .collect()
    }

    /// Value entries for the collect endpoint; null results are omitted
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.results
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(field, value)| {
                Entry::Value(ValueEntry {
                    device: self.device.clone(),
                    data_source_id: self.data_source_id.clone(),
                    dp_id: field.clone(),
                    value: value.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Query, Target};

    fn descriptor(fields: &[&str], hints: &[&str]) -> Descriptor {
        Descriptor {
            device: "app1".to_string(),
            data_source_id: "heap".to_string(),
            target: Target {
                host: "app1".to_string(),
                port: 9999,
            },
            credentials: None,
            object_name: "java.lang:type=Memory".to_string(),
            query: Query::Attribute {
                name: "HeapMemoryUsage".to_string(),
                path: None,
            },
            output_fields: fields.iter().map(ToString::to_string).collect(),
            type_hints: hints.iter().map(ToString::to_string).collect(),
            component: None,
            event_class: None,
            event_key: None,
        }
    }

    #[test]
    fn type_map_is_padded() {
        let summary = Summary::new(&descriptor(&["a", "b", "c"], &["GAUGE"]), "id".into(), "x".into());
        assert_eq!(summary.type_map.len(), 3);
        assert_eq!(summary.type_map["a"], "GAUGE");
        assert_eq!(summary.type_map["c"], "");
    }

    #[test]
    fn posting_rules() {
        let mut summary = Summary::new(
            &descriptor(&["used", "count", "label", "state", "gone"], &["GAUGE", "COUNTER", "", "GAUGE", "GAUGE"]),
            "id".into(),
            "x".into(),
        );
        summary.results.insert("used".into(), Value::Int(10));
        summary.results.insert("count".into(), Value::Int(7));
        summary.results.insert("label".into(), Value::from("heap"));
        summary.results.insert("state".into(), Value::from("RUNNING"));
        summary.results.insert("gone".into(), Value::Null);

        let samples = summary.samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].data_point, "heap_used");
        assert_eq!(samples[0].value, SampleValue::Gauge(10.0));
        assert_eq!(samples[1].value, SampleValue::Raw("7".to_string()));
        assert_eq!(samples[2].value, SampleValue::Raw("heap".to_string()));
    }

    #[test]
    fn cancelled_summary_has_no_results() {
        let mut summary = Summary::new(&descriptor(&["used"], &[]), "id".into(), "x".into());
        summary.results.insert("used".into(), Value::Int(1));
        let summary = summary.into_cancelled();
        assert!(summary.cancelled);
        assert!(summary.entries().is_empty());
    }
}
