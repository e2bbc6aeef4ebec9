//! Sub-query count caches.
//!
//! Keys are rendered sub-queries, values the total counts the server
//! reported for them. The engine only ever talks to the [`QueryCache`]
//! trait; whether entries live in memory or in a file on disk is the
//! backend's concern.

mod file;
mod memory;

use std::collections::HashMap;

use crate::error::Result;

pub use file::{CacheMode, FileCache};
pub use memory::MemoryCache;

pub trait QueryCache {
    fn get(&self, key: &str) -> Option<u64>;

    /// Store a count. Backends that persist eagerly may fail with a
    /// file error.
    fn put(&mut self, key: &str, amount: u64) -> Result<()>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Bulk-import entries, overwriting on key collisions.
    fn update(&mut self, entries: &HashMap<String, u64>);

    /// Drop every entry.
    fn reset(&mut self);

    /// Flush buffered writes to the backing store, if any.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: QueryCache + ?Sized> QueryCache for Box<T> {
    fn get(&self, key: &str) -> Option<u64> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, amount: u64) -> Result<()> {
        (**self).put(key, amount)
    }

    fn contains(&self, key: &str) -> bool {
        (**self).contains(key)
    }

    fn update(&mut self, entries: &HashMap<String, u64>) {
        (**self).update(entries)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}
