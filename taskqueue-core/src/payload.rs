use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

/// An opaque byte sequence carried over the wire as a hex string.
///
/// Task payloads, result blobs, and checkpoint state are all structured
/// data only to the task function that produced or consumes them; the core
/// treats them as bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, ToSchema)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload(value)
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload(value.to_vec())
    }
}

impl Serialize for Payload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x"))
            .map(Payload)
            .map_err(serde::de::Error::custom)
    }
}
