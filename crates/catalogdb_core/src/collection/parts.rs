//! Storage parts an entity collection keeps in its record store.
//!
//! An entity is split into independently versioned records so that a read
//! fetches only the sections it asks for:
//!
//! | type | id | content |
//! |---|---|---|
//! | 1 body | pk | version, parent, associated data keys |
//! | 2 attributes | pk | all attribute records |
//! | 3 associated data | `"pk:name"` | one associated data record |
//! | 4 prices | pk | inner record handling and all prices |
//! | 5 references | pk | all references |
//! | 6 schema | 0 | the entity schema |
//! | 7 entity index | index id | one serialized index |

use crate::error::CoreResult;
use crate::model::{AttributeRecord, Price, Reference};
use crate::types::{IndexId, PrimaryKey};
use bytes::Bytes;
use catalogdb_storage::{RecordKey, RecordType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) const ENTITY_BODY: RecordType = RecordType(1);
pub(crate) const ATTRIBUTES: RecordType = RecordType(2);
pub(crate) const ASSOCIATED_DATA: RecordType = RecordType(3);
pub(crate) const PRICES: RecordType = RecordType(4);
pub(crate) const REFERENCES: RecordType = RecordType(5);
pub(crate) const SCHEMA: RecordType = RecordType(6);
pub(crate) const ENTITY_INDEX: RecordType = RecordType(7);

/// Serialized record content; `None` in a write set marks a removal.
pub(crate) type Payload = Bytes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EntityBody {
    pub(crate) primary_key: PrimaryKey,
    pub(crate) version: u64,
    pub(crate) parent: Option<PrimaryKey>,
    pub(crate) associated_data_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AttributesPart {
    pub(crate) attributes: BTreeMap<String, AttributeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PricesPart {
    pub(crate) inner_record_handling: u8,
    pub(crate) prices: Vec<Price>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ReferencesPart {
    pub(crate) references: Vec<Reference>,
}

pub(crate) fn body_key(primary_key: PrimaryKey) -> RecordKey {
    RecordKey::numeric(ENTITY_BODY, primary_key)
}

pub(crate) fn attributes_key(primary_key: PrimaryKey) -> RecordKey {
    RecordKey::numeric(ATTRIBUTES, primary_key)
}

pub(crate) fn associated_data_key(primary_key: PrimaryKey, name: &str) -> RecordKey {
    RecordKey::named(ASSOCIATED_DATA, format!("{primary_key}:{name}"))
}

pub(crate) fn prices_key(primary_key: PrimaryKey) -> RecordKey {
    RecordKey::numeric(PRICES, primary_key)
}

pub(crate) fn references_key(primary_key: PrimaryKey) -> RecordKey {
    RecordKey::numeric(REFERENCES, primary_key)
}

pub(crate) fn schema_key() -> RecordKey {
    RecordKey::numeric(SCHEMA, 0)
}

pub(crate) fn index_key(id: IndexId) -> RecordKey {
    RecordKey::numeric(ENTITY_INDEX, i64::from(id.0))
}

pub(crate) fn encode_part<T: Serialize>(part: &T) -> CoreResult<Payload> {
    Ok(Bytes::from(catalogdb_codec::encode(part)?))
}

pub(crate) fn decode_part<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    Ok(catalogdb_codec::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogdb_storage::KeyId;

    #[test]
    fn associated_data_keys_are_named() {
        let key = associated_data_key(7, "description");
        assert_eq!(key.record_type, ASSOCIATED_DATA);
        assert_eq!(key.id, KeyId::Named("7:description".into()));
    }

    #[test]
    fn body_survives_codec() {
        let body = EntityBody {
            primary_key: 3,
            version: 2,
            parent: Some(1),
            associated_data_keys: ["description".to_owned()].into_iter().collect(),
        };
        let decoded: EntityBody = decode_part(&encode_part(&body).unwrap()).unwrap();
        assert_eq!(decoded, body);
    }
}
