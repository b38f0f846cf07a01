use crate::config::Config;
use crate::decoder::RawRecord;
use crate::registry::EntityRegistry;
use crate::upsert::UpsertEngine;
use row_store::{MemoryStore, RowStore};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub const TEST_CONFIG: &str = r#"
listener:
    host: "127.0.0.1"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
entities:
    person:
        key: [hcode, cid]
        fields:
            hcode: {type: text, max_length: 9}
            cid: {type: text, max_length: 13}
            fname: {type: text, max_length: 50}
            birth: {type: date}
    service:
        key: [hcode, cid, datesev]
        fields:
            hcode: {type: text, max_length: 9}
            cid: {type: text, max_length: 13}
            datesev: {type: date}
            vn: {type: text, max_length: 12}
            cost: {type: decimal, precision: 10, scale: 2}
            d_update: {type: timestamp}
table_map:
    person: person
    cmu_dent_person: person
    service: service
"#;

pub fn test_config() -> Config {
    serde_yaml::from_str(TEST_CONFIG).unwrap()
}

pub fn test_registry() -> Arc<EntityRegistry> {
    Arc::new(EntityRegistry::from_config(&test_config()).unwrap())
}

/// An engine over a fresh in-memory store, plus a handle to inspect the store.
pub fn test_engine() -> (UpsertEngine, Arc<MemoryStore>) {
    let registry = test_registry();
    let store = Arc::new(MemoryStore::new(registry.descriptors().to_vec()));
    let engine = UpsertEngine::new(registry, store.clone() as Arc<dyn RowStore>);
    (engine, store)
}

/// Converts a JSON array of objects into wire records.
pub fn records(batch: JsonValue) -> Vec<RawRecord> {
    serde_json::from_value(batch).unwrap()
}
