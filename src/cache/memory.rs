//! Volatile in-memory cache.

use std::collections::HashMap;

use crate::error::Result;

use super::QueryCache;

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, u64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    fn put(&mut self, key: &str, amount: u64) -> Result<()> {
        self.entries.insert(key.to_string(), amount);
        Ok(())
    }

    fn update(&mut self, entries: &HashMap<String, u64>) {
        for (key, amount) in entries {
            self.entries.insert(key.clone(), *amount);
        }
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
