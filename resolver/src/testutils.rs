use crate::shared_cache::{SharedCache, SharedCacheError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared-cache double backed by a plain map, with a switch to simulate
/// the tier being unreachable.
#[derive(Default)]
pub struct InMemorySharedCache {
    entries: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn check(&self) -> Result<(), SharedCacheError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(SharedCacheError::Unavailable("shared cache offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<String, SharedCacheError> {
        self.check()?;
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or(SharedCacheError::NotFound)
    }

    async fn set(&self, key: &str, project: &str) -> Result<(), SharedCacheError> {
        self.check()?;
        self.entries
            .lock()
            .insert(key.to_string(), project.to_string());
        Ok(())
    }

    async fn set_batch(&self, keys: &[String], project: &str) -> Result<(), SharedCacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        for key in keys {
            entries.insert(key.clone(), project.to_string());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SharedCacheError> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), SharedCacheError> {
        self.check()
    }
}
