// Storage and wire blobs use bincode 2.x with the standard configuration.
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| ChainError::Serialization(format!("Serialization failed: {e}")))
}

pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| ChainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Sample {
        height: u64,
        hash: String,
        payload: Vec<u8>,
    }

    #[test]
    fn test_roundtrip() {
        let original = Sample {
            height: 42,
            hash: "deadbeef".to_string(),
            payload: vec![1, 2, 3],
        };

        let bytes = serialize(&original).unwrap();
        let decoded: Sample = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Sample> = deserialize(&invalid);
        assert!(result.is_err());
    }
}
