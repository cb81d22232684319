//! Decision service request and response types
//!
//! Field names on the wire follow the decision service contract exactly
//! (`connectionNumber`, `bindDN`, `Result`, `Entities`, ...).

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

// ============================================================================
// Requests
// ============================================================================

/// Form body for `POST /bind`
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct BindDecisionRequest {
    #[serde(rename = "connectionNumber")]
    pub connection_number: i64,

    pub strand: String,

    /// DN the client is attempting to bind as
    #[serde(rename = "bindDN")]
    pub bind_dn: String,

    #[serde(rename = "bindSimplePw")]
    pub bind_password: String,

    /// DN the connection is currently bound as
    #[serde(rename = "boundDN")]
    pub bound_dn: String,
}

impl fmt::Debug for BindDecisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindDecisionRequest")
            .field("connection_number", &self.connection_number)
            .field("strand", &self.strand)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .field("bound_dn", &self.bound_dn)
            .finish()
    }
}

/// Form body for `POST /search`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchDecisionRequest {
    #[serde(rename = "connectionNumber")]
    pub connection_number: i64,

    pub strand: String,

    #[serde(rename = "boundDN")]
    pub bound_dn: String,

    #[serde(rename = "BaseDN")]
    pub base_dn: String,
}

// ============================================================================
// Responses
// ============================================================================
//
// Keys are matched in two casings only: the capitalised form the decision
// service emits (`Result`, `Strand`, `Entities`, `DN`, `Attributes`) and its
// all-lowercase alias. Any other casing (`RESULT`, `dN`, ...) is treated as an
// unknown key and the field keeps its default.

/// JSON body returned by `POST /bind`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BindDecision {
    #[serde(rename = "Result", alias = "result", deserialize_with = "null_as_default")]
    pub result: bool,

    #[serde(rename = "Strand", alias = "strand", deserialize_with = "null_as_default")]
    pub strand: String,
}

/// JSON body returned by `POST /search`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchDecision {
    #[serde(rename = "Result", alias = "result", deserialize_with = "null_as_default")]
    pub result: bool,

    #[serde(rename = "Strand", alias = "strand", deserialize_with = "null_as_default")]
    pub strand: String,

    #[serde(rename = "Entities", alias = "entities", deserialize_with = "null_as_default")]
    pub entities: Vec<Entity>,
}

/// A directory entry returned by the decision service
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Entity {
    #[serde(rename = "DN", alias = "dn", deserialize_with = "null_as_default")]
    pub dn: String,

    /// Attribute name to values. Value order is kept as received.
    /// A `null` value list decodes as empty and a `null` value as `""`.
    #[serde(rename = "Attributes", alias = "attributes", deserialize_with = "attribute_map")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entity {
    /// Get first value of an attribute
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Decode a response body, falling back to the all-false default.
///
/// An empty, truncated or otherwise undecodable body never propagates as an
/// error: it becomes `T::default()`, whose `result` is `false`, so a broken
/// decision service can only ever deny.
pub fn decode_permissive<T>(body: &[u8]) -> T
where
    T: DeserializeOwned + Default,
{
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                error = %e,
                body_len = body.len(),
                "undecodable decision response, treating as denial"
            );
            T::default()
        }
    }
}

/// JSON `null` decodes to the type's default instead of failing the whole body
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Attribute map where `null` is accepted at every level
fn attribute_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Option<Vec<Option<String>>>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, values)| {
            let values = values
                .unwrap_or_default()
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect();
            (name, values)
        })
        .collect())
}
