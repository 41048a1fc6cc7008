//! Serde bridge onto CBOR.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns `EncodingFailed` if the serializer rejects the value.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns `DecodingFailed` if the bytes are not valid CBOR for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Header {
        name: String,
        version: u64,
        ids: Vec<u32>,
        parent: Option<u32>,
    }

    #[test]
    fn struct_roundtrip() {
        let header = Header {
            name: "product".into(),
            version: 7,
            ids: vec![1, 2, 3],
            parent: None,
        };
        let bytes = encode(&header).unwrap();
        let decoded: Header = decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn map_with_tuple_keys() {
        let mut map = BTreeMap::new();
        map.insert((1u8, 10i64), "a".to_string());
        map.insert((2u8, -4i64), "b".to_string());
        let bytes = encode(&map).unwrap();
        let decoded: BTreeMap<(u8, i64), String> = decode(&bytes).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: CodecResult<Header> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
