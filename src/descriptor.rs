//! Monitoring-target descriptors
//!
//! The controller hands out [`RawDescriptor`]s: loosely typed, camelCase JSON
//! objects. [`Descriptor::try_from`] validates one into an immutable
//! [`Descriptor`] or rejects it with a configuration error before any call is
//! built from it.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Descriptor as delivered by the controller or the collect endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawDescriptor {
    /// Device the data source belongs to
    pub device: Option<String>,

    /// Management address; falls back to `device` when empty
    pub manage_ip: Option<String>,

    /// Agent port, as a number or a string
    #[serde(deserialize_with = "port_from_any")]
    pub port: Option<String>,

    /// Data source identifier
    pub id: Option<String>,

    pub authenticate: bool,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Managed object (resource) name
    pub object_name: Option<String>,
    pub attribute_name: Option<String>,

    /// Value path applied to a structured attribute
    pub attribute_path: Option<String>,

    pub operation_name: Option<String>,

    /// Comma-separated operation parameter values
    pub operation_param_values: Option<String>,

    /// Comma-separated operation parameter types
    pub operation_param_types: Option<String>,

    /// Output field (data point) names
    pub dps: Vec<String>,

    /// Per-field value-type hints, aligned with `dps`
    pub dptypes: Vec<String>,

    pub component: Option<String>,
    pub event_class: Option<String>,
    pub event_key: Option<String>,
}

fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Port>::deserialize(deserializer)?.map(|p| match p {
        Port::Number(n) => n.to_string(),
        Port::Text(s) => s,
    }))
}

/// Network identity of a managed agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Username/password pair used to authenticate against an agent
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What a descriptor asks the agent for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Read one attribute, optionally walking into it with a value path
    Attribute { name: String, path: Option<String> },

    /// Invoke an operation with positional parameters
    Operation {
        name: String,
        params: Vec<String>,
        param_types: Vec<String>,
    },
}

/// Validated, immutable description of one thing to collect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub device: String,
    pub data_source_id: String,
    pub target: Target,
    pub credentials: Option<Credentials>,
    pub object_name: String,
    pub query: Query,
    pub output_fields: Vec<String>,

    /// Value-type hints, one per output field (empty when undeclared)
    pub type_hints: Vec<String>,

    pub component: Option<String>,
    pub event_class: Option<String>,
    pub event_key: Option<String>,
}

impl Descriptor {
    /// Event key used when reporting errors for this descriptor
    #[must_use]
    pub fn event_key(&self) -> &str {
        self.event_key.as_deref().unwrap_or(&self.data_source_id)
    }
}

impl TryFrom<RawDescriptor> for Descriptor {
    type Error = Error;

    fn try_from(raw: RawDescriptor) -> Result<Self> {
        let ds = raw.id.clone().unwrap_or_default();

        if raw.dps.is_empty() {
            return Err(Error::Config(format!("data source '{ds}': no output fields defined")));
        }

        let device = non_empty(raw.device)
            .ok_or_else(|| Error::Config(format!("data source '{ds}': no device")))?;

        let host = non_empty(raw.manage_ip).unwrap_or_else(|| device.clone());
        let port = non_empty(raw.port)
            .ok_or_else(|| Error::Config(format!("data source '{ds}': no agent port")))?;
        let port: u16 = port.trim().parse().map_err(|_| {
            Error::Config(format!("data source '{ds}': unparsable agent port '{port}'"))
        })?;

        let object_name = non_empty(raw.object_name)
            .ok_or_else(|| Error::Config(format!("data source '{ds}': no object name")))?;

        let query = if let Some(name) = non_empty(raw.operation_name) {
            let params = split_list(raw.operation_param_values.as_deref());
            let param_types = split_list(raw.operation_param_types.as_deref());
            if !params.is_empty() && params.len() != param_types.len() {
                return Err(Error::Config(format!(
                    "data source '{ds}': {} parameter values but {} parameter types",
                    params.len(),
                    param_types.len()
                )));
            }
            Query::Operation {
                name,
                params,
                param_types,
            }
        } else if let Some(name) = non_empty(raw.attribute_name) {
            Query::Attribute {
                name,
                path: non_empty(raw.attribute_path),
            }
        } else {
            return Err(Error::Config(format!(
                "data source '{ds}': neither attribute nor operation name"
            )));
        };

        let username = raw.username.unwrap_or_default();
        let credentials = (raw.authenticate || !username.is_empty()).then(|| Credentials {
            username,
            password: raw.password.unwrap_or_default(),
        });

        let mut type_hints = raw.dptypes;
        type_hints.resize(raw.dps.len(), String::new());

        Ok(Self {
            device,
            data_source_id: ds,
            target: Target { host, port },
            credentials,
            object_name,
            query,
            output_fields: raw.dps,
            type_hints,
            component: raw.component,
            event_class: raw.event_class,
            event_key: non_empty(raw.event_key),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    match value {
        None | Some("") => Vec::new(),
        Some(list) => list.split(',').map(ToString::to_string).collect(),
    }
}
