//! What the collector reports upstream
//!
//! Successful calls turn into [`Sample`]s for the result sink, or into
//! [`Entry::Value`] items on the collect endpoint. Failures of any kind turn
//! into a [`Failure`] tagged with its [`ErrorClass`].

use serde::Serialize;

use crate::call::Call;
use crate::descriptor::{Descriptor, RawDescriptor};
use crate::error::{Error, ErrorClass};

/// Event class used when a descriptor does not name one
pub const DEFAULT_EVENT_CLASS: &str = "/Status/Agent";

/// Event class for connection failures
pub const CONNECTION_EVENT_CLASS: &str = "/Status/Agent/Connection";

/// One data point posted to the result sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub device: String,
    pub component: Option<String>,

    /// `<dataSourceId>_<field>`
    pub data_point: String,
    pub value: SampleValue,
}

/// Sample payload: raw text for counters and untyped fields, a number
/// otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SampleValue {
    Raw(String),
    Gauge(f64),
}

/// Error report for one descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub device: String,
    pub data_source_id: Option<String>,
    #[serde(rename = "classification")]
    pub class: ErrorClass,
    pub component: Option<String>,
    pub event_class: String,
    pub event_key: Option<String>,
    #[serde(rename = "summary")]
    pub message: String,
}

impl Failure {
    /// Failure of a validated descriptor
    #[must_use]
    pub fn for_descriptor(descriptor: &Descriptor, error: &Error) -> Self {
        let class = error.class();
        Self {
            device: descriptor.device.clone(),
            data_source_id: Some(descriptor.data_source_id.clone()),
            class,
            component: descriptor.component.clone(),
            event_class: event_class(class, descriptor.event_class.as_deref()),
            event_key: Some(descriptor.event_key().to_string()),
            message: format!(
                "DataSource {}; {error}",
                descriptor.data_source_id
            ),
        }
    }

    /// Failure of a call, mentioning what the call was doing
    #[must_use]
    pub fn for_call(call: &Call, error: &Error) -> Self {
        let mut failure = Self::for_descriptor(call.descriptor(), error);
        failure.message = format!(
            "DataSource {}; error calling {} on {}: {error}",
            call.descriptor().data_source_id,
            call.description(),
            call.descriptor().object_name
        );
        failure
    }

    /// Failure of a descriptor that never validated
    #[must_use]
    pub fn for_raw(raw: &RawDescriptor, error: &Error) -> Self {
        let class = error.class();
        Self {
            device: raw.device.clone().unwrap_or_default(),
            data_source_id: raw.id.clone(),
            class,
            component: raw.component.clone(),
            event_class: event_class(class, raw.event_class.as_deref()),
            event_key: raw.event_key.clone().or_else(|| raw.id.clone()),
            message: error.to_string(),
        }
    }

    /// Connection failure not tied to a particular data source
    #[must_use]
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        Self {
            device: device.to_string(),
            data_source_id: None,
            class: ErrorClass::Connection,
            component: None,
            event_class: CONNECTION_EVENT_CLASS.to_string(),
            event_key: None,
            message: message.into(),
        }
    }
}

fn event_class(class: ErrorClass, declared: Option<&str>) -> String {
    match (class, declared) {
        (ErrorClass::Connection, _) => CONNECTION_EVENT_CLASS.to_string(),
        (_, Some(declared)) if !declared.is_empty() => declared.to_string(),
        _ => DEFAULT_EVENT_CLASS.to_string(),
    }
}

/// Collected value as returned by the collect endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueEntry {
    pub device: String,
    pub data_source_id: String,
    pub dp_id: String,
    pub value: String,
}

/// One item of a collect response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Entry {
    Value(ValueEntry),
    Error(Failure),
}

impl Entry {
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Classification of an error entry
    #[must_use]
    pub const fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Value(_) => None,
            Self::Error(f) => Some(f.class),
        }
    }
}
