use failure::ResultExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ErrorKind;
use super::Result;

/// Convert typed znode payloads to and from bytes.
///
/// Only typed payloads go through the serializer: raw byte payloads are stored verbatim.
/// No framing or versioning is added around the encoded bytes.
pub trait Serializer: Send + Sync + 'static {
    /// Encode a value into the bytes stored in a znode.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized;

    /// Decode the bytes stored in a znode.
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned;
}

/// Store payloads as JSON documents (default).
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value).context(ErrorKind::Encode("json payload"))?;
        Ok(bytes)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = serde_json::from_slice(bytes).context(ErrorKind::Decode("json payload"))?;
        Ok(value)
    }
}

/// Store payloads in the compact bincode binary format.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let bytes = bincode::serialize(value).context(ErrorKind::Encode("bincode payload"))?;
        Ok(bytes)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value =
            bincode::deserialize(bytes).context(ErrorKind::Decode("bincode payload"))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;
    use serde::Serialize;

    use super::BincodeSerializer;
    use super::JsonSerializer;
    use super::Serializer;
    use crate::ErrorKind;

    #[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
    struct Worker {
        id: u64,
        name: String,
        tags: BTreeMap<String, String>,
    }

    fn worker() -> Worker {
        let mut tags = BTreeMap::new();
        tags.insert("group".into(), "reports".into());
        Worker {
            id: 42,
            name: "n".into(),
            tags,
        }
    }

    #[test]
    fn json_payload_is_plain_json() {
        let bytes = JsonSerializer.serialize(&worker()).unwrap();
        let document: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(document["id"], 42);
        assert_eq!(document["name"], "n");
        let decoded: Worker = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, worker());
    }

    #[test]
    fn json_decode_failure() {
        let error = JsonSerializer.deserialize::<Worker>(b"\x00\x01").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Decode("json payload"));
        assert!(error.is_coordination_failure());
    }

    #[test]
    fn bincode_decodes_what_it_encodes() {
        let bytes = BincodeSerializer.serialize(&worker()).unwrap();
        let decoded: Worker = BincodeSerializer.deserialize(&bytes).unwrap();
        assert_eq!(decoded, worker());
    }

    #[test]
    fn bincode_decode_failure() {
        let error = BincodeSerializer.deserialize::<Worker>(&[1]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Decode("bincode payload"));
    }
}
