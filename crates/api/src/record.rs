use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// A proxy or proxy group as reported by the engine.
///
/// Plain proxies share the same shape: they carry their own protocol as `kind` and have
/// no members.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Name of the group. Filled from the map key, the engine does not repeat it.
    #[serde(default, skip_serializing)]
    pub name: String,

    /// Policy type tag, e.g. `Selector`, `URLTest`, `Fallback`, or a proxy protocol.
    #[serde(rename = "type")]
    pub kind: String,

    /// Currently selected member, empty when unset.
    #[serde(default, deserialize_with = "null_as_default")]
    pub now: String,

    /// Members in engine order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub all: Vec<String>,
}

/// Some engines send `null` instead of omitting a field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl GroupRecord {
    /// Creates a record.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        now: impl Into<String>,
        all: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            now: now.into(),
            all: all.into_iter().map(Into::into).collect(),
        }
    }
}

/// Body of `GET /proxies`.
#[derive(Debug, Deserialize)]
pub struct ProxiesResponse {
    /// Every proxy and group, keyed by name.
    pub proxies: HashMap<String, GroupRecord>,
}

impl ProxiesResponse {
    /// Returns the records with their `name` populated from the map keys.
    #[must_use]
    pub fn into_records(self) -> HashMap<String, GroupRecord> {
        self.proxies
            .into_iter()
            .map(|(name, mut record)| {
                record.name.clone_from(&name);
                (name, record)
            })
            .collect()
    }
}
