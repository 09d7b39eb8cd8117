//! Key-value option store.
//!
//! All shared mutable state (settings blob, token set, tenant id, delivery
//! states, invoice meta, encrypted credentials) lives under well-known keys in
//! a single external store. There are no multi-key transactional guarantees;
//! read-modify-write sequences are last-write-wins.

use async_trait::async_trait;
use mongodb::{
    bson::{doc, Bson},
    options::ReplaceOptions,
    Collection, Database,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppError;

pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const XERO_TOKENS: &str = "xero_tokens";
    pub const XERO_TENANT: &str = "xero_tenant";
    pub const XERO_OAUTH_STATE: &str = "xero_oauth_state";
    pub const DELIVERY_STATES: &str = "delivery_states";
    pub const INVOICE_META: &str = "invoice_meta";
    pub const WC_API_CREDENTIALS: &str = "wc_api_credentials";
    pub const WC_API_KEY_NOTICE: &str = "wc_api_key_notice";
}

#[async_trait]
pub trait OptionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Read a typed option. A missing key and a value that no longer matches the
/// expected shape both come back as `None`; only store failures are errors.
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn OptionStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    Ok(store
        .get(key)
        .await?
        .and_then(|value| serde_json::from_value(value).ok()))
}

pub async fn set_as<T: Serialize>(
    store: &dyn OptionStore,
    key: &str,
    value: &T,
) -> Result<(), AppError> {
    let value = serde_json::to_value(value)
        .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
    store.set(key, value).await
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct OptionDoc {
    #[serde(rename = "_id")]
    key: String,
    value: Bson,
}

#[derive(Clone)]
pub struct MongoOptionStore {
    collection: Collection<OptionDoc>,
}

impl MongoOptionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("options"),
        }
    }
}

#[async_trait]
impl OptionStore for MongoOptionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let document = self.collection.find_one(doc! { "_id": key }, None).await?;
        Ok(document.map(|d| d.value.into()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let value = mongodb::bson::to_bson(&value)
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
        let replacement = OptionDoc {
            key: key.to_string(),
            value,
        };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(doc! { "_id": key }, replacement, options)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.collection.delete_one(doc! { "_id": key }, None).await?;
        Ok(())
    }
}

/// In-memory store for tests and embedded use.
#[derive(Default)]
pub struct MemoryOptionStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OptionStore for MemoryOptionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryOptionStore::new();
        store
            .set("k", json!({"a": 1}))
            .await
            .expect("set should succeed");
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_as_degrades_malformed_values_to_none() {
        let store = MemoryOptionStore::new();
        store.set("tokens", json!("not an object")).await.unwrap();

        let tokens: Option<crate::models::TokenSet> = get_as(&store, "tokens").await.unwrap();
        assert!(tokens.is_none());
    }
}
