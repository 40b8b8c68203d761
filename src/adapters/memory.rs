use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::{ContentProvider, SessionProvider, SiteResult};

/// Content items held in memory, keyed by `(collection, key)`
#[derive(Default)]
pub struct MemoryContentStore {
    items: DashMap<(String, String), JsonValue>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a content item
    pub fn insert(&self, collection: impl Into<String>, key: impl Into<String>, value: JsonValue) {
        let (collection, key) = (collection.into(), key.into());
        log::debug!("Storing content item {collection}/{key}");
        self.items.insert((collection, key), value);
    }

    pub fn remove(&self, collection: &str, key: &str) -> Option<JsonValue> {
        self.items
            .remove(&(collection.to_string(), key.to_string()))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ContentProvider for MemoryContentStore {
    async fn fetch(&self, collection: &str, key: &str) -> SiteResult<Option<JsonValue>> {
        Ok(self
            .items
            .get(&(collection.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn keys(&self, collection: &str) -> SiteResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .items
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Sessions held in memory for the lifetime of the process
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, JsonMap<String, JsonValue>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionProvider for MemorySessionStore {
    async fn load(&self, id: &str) -> SiteResult<Option<JsonMap<String, JsonValue>>> {
        Ok(self.sessions.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, id: &str, data: &JsonMap<String, JsonValue>) -> SiteResult<()> {
        self.sessions.insert(id.to_string(), data.clone());
        Ok(())
    }

    async fn destroy(&self, id: &str) -> SiteResult<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_content_store() {
        let store = MemoryContentStore::new();
        store.insert("page", "about", json!({"title": "About"}));
        store.insert("page", "contact", json!({"title": "Contact"}));
        store.insert("post", "hello", json!({"title": "Hello"}));

        assert_eq!(
            store.fetch("page", "about").await.unwrap(),
            Some(json!({"title": "About"}))
        );
        assert_eq!(store.fetch("page", "hello").await.unwrap(), None);
        assert_eq!(store.keys("page").await.unwrap(), vec!["about", "contact"]);

        assert!(store.remove("post", "hello").is_some());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_session_store() {
        let store = MemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_none());

        let mut data = JsonMap::new();
        data.insert("user".to_string(), json!("ada"));
        store.save("s1", &data).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap(), Some(data));

        store.destroy("s1").await.unwrap();
        assert!(store.is_empty());
    }
}
