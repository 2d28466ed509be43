use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

// Aliases accept the field names emitted by the Go producers.

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "Name")]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tweet {
    #[serde(alias = "Message")]
    pub message: String,
    #[serde(alias = "User")]
    pub author: Option<User>,
    #[serde(alias = "Tags", deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(alias = "RemoteAddress")]
    pub remote_address: String,
}

/// A tweet annotated with the localized names of the place its remote address resolves to.
/// Both maps are always present, and empty when the address could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedTweet {
    #[serde(flatten)]
    pub tweet: Tweet,
    pub city: HashMap<String, String>,
    pub country: HashMap<String, String>,
}

/// A serialized document waiting in a writer buffer, tagged with its destination index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferEntry {
    pub index: Arc<str>,
    pub payload: Vec<u8>,
}

/// Decodes a raw message payload into the expected record type.
pub fn decode<T>(payload: &[u8]) -> Result<T, serde_json::Error>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(payload)
}

// Go marshals a nil slice as null.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
