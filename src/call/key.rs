//! Identity of a call
//!
//! Two calls are the same call when they would hit the same agent, as the same
//! principal, for the same object and output fields on behalf of the same data
//! source. The password never appears in a key in clear; it is folded in as a
//! SHA-256 digest.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::descriptor::Descriptor;

/// Value-based identity used for in-flight deduplication
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    host: String,
    port: u16,
    username: Option<String>,
    password_digest: Option<String>,
    object_name: String,
    output_fields: Vec<String>,
    device: String,
    data_source_id: String,
}

impl CallKey {
    #[must_use]
    pub fn for_descriptor(descriptor: &Descriptor) -> Self {
        let (username, password_digest) = descriptor.credentials.as_ref().map_or((None, None), |c| {
            (
                Some(c.username.clone()),
                Some(hex::encode(Sha256::digest(c.password.as_bytes()))),
            )
        });

        Self {
            host: descriptor.target.host.clone(),
            port: descriptor.target.port,
            username,
            password_digest,
            object_name: descriptor.object_name.clone(),
            output_fields: descriptor.output_fields.clone(),
            device: descriptor.device.clone(),
            data_source_id: descriptor.data_source_id.clone(),
        }
    }

    /// Short stable identifier for log lines
    #[must_use]
    pub fn short_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.port.to_le_bytes());
        for part in self.parts() {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..12].to_string()
    }

    fn parts(&self) -> impl Iterator<Item = &str> {
        [
            self.host.as_str(),
            self.username.as_deref().unwrap_or(""),
            self.password_digest.as_deref().unwrap_or(""),
            self.object_name.as_str(),
            self.device.as_str(),
            self.data_source_id.as_str(),
        ]
        .into_iter()
        .chain(self.output_fields.iter().map(String::as_str))
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub fn data_source_id(&self) -> &str {
        &self.data_source_id
    }
}

impl fmt::Debug for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallKey")
            .field("id", &self.short_id())
            .field("target", &format_args!("{}:{}", self.host, self.port))
            .field("object_name", &self.object_name)
            .field("device", &self.device)
            .field("data_source_id", &self.data_source_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::descriptor::{Credentials, Query, Target};

    fn descriptor() -> Descriptor {
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
            output_fields: vec!["used".to_string()],
            type_hints: vec![String::new()],
            component: None,
            event_class: None,
            event_key: None,
        }
    }

    #[test]
    fn equal_descriptors_produce_equal_keys() {
        let a = CallKey::for_descriptor(&descriptor());
        let b = CallKey::for_descriptor(&descriptor());
        assert_eq!(a, b);
        assert_eq!(a.short_id(), b.short_id());
        assert_eq!(a.short_id().len(), 12);
    }

    #[test]
    fn output_fields_are_part_of_identity() {
        let mut other = descriptor();
        other.output_fields.push("max".to_string());
        assert_ne!(
            CallKey::for_descriptor(&descriptor()),
            CallKey::for_descriptor(&other)
        );
    }

    #[test]
    fn fields_outside_the_identity_do_not_change_the_key() {
        let key = CallKey::for_descriptor(&descriptor());

        let mut other = descriptor();
        other.query = Query::Attribute {
            name: "NonHeapMemoryUsage".to_string(),
            path: Some("usage".to_string()),
        };
        other.type_hints = vec!["GAUGE".to_string()];
        other.component = Some("jvm".to_string());
        other.event_class = Some("/Status/Memory".to_string());
        other.event_key = Some("heap-usage".to_string());

        assert_eq!(key, CallKey::for_descriptor(&other));
        assert_eq!(key.short_id(), CallKey::for_descriptor(&other).short_id());
    }

    #[test]
    fn representative_descriptors_do_not_collide() {
        let mut descriptors = vec![descriptor()];

        let mut d = descriptor();
        d.target.host = "app2".to_string();
        descriptors.push(d);

        let mut d = descriptor();
        d.target.port = 9998;
        descriptors.push(d);

        let mut d = descriptor();
        d.credentials = Some(Credentials {
            username: "monitor".to_string(),
            password: "s3cret".to_string(),
        });
        descriptors.push(d.clone());

        if let Some(c) = d.credentials.as_mut() {
            c.username = "admin".to_string();
        }
        descriptors.push(d);

        let mut d = descriptor();
        d.object_name = "java.lang:type=Threading".to_string();
        descriptors.push(d);

        let mut d = descriptor();
        d.output_fields = vec!["used".to_string(), "max".to_string()];
        descriptors.push(d);

        let mut d = descriptor();
        d.output_fields = vec!["max".to_string(), "used".to_string()];
        descriptors.push(d);

        let mut d = descriptor();
        d.device = "app1-replica".to_string();
        descriptors.push(d);

        let mut d = descriptor();
        d.data_source_id = "heap2".to_string();
        descriptors.push(d);

        // Field boundaries must not be ambiguous
        let mut d = descriptor();
        d.output_fields = vec!["us".to_string(), "ed".to_string()];
        descriptors.push(d);

        let keys: HashSet<CallKey> = descriptors.iter().map(CallKey::for_descriptor).collect();
        assert_eq!(keys.len(), descriptors.len());

        let short_ids: HashSet<String> = keys.iter().map(CallKey::short_id).collect();
        assert_eq!(short_ids.len(), descriptors.len());
    }

    #[test]
    fn password_is_digested() {
        let mut d = descriptor();
        d.credentials = Some(Credentials {
            username: "monitor".to_string(),
            password: "s3cret".to_string(),
        });
        let key = CallKey::for_descriptor(&d);
        assert!(!format!("{key:?}").contains("s3cret"));

        let mut changed = d.clone();
        if let Some(c) = changed.credentials.as_mut() {
            c.password = "other".to_string();
        }
        assert_ne!(key, CallKey::for_descriptor(&changed));
    }
}
