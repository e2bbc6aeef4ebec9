//! File-backed persistent cache.
//!
//! The on-disk format is a flat JSON object mapping rendered
//! sub-queries to counts, written atomically on `sync`. Unbuffered
//! caches sync after every insert; buffered ones wait for an explicit
//! `sync` (the runner issues one between queries and at shutdown).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use tracing::debug;

use crate::error::{Error, Result};

use super::QueryCache;

/// How to open the cache file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheMode {
    /// The file must exist; nothing is ever written back.
    Read,
    /// The file must exist; writes persist.
    Write,
    /// Load the file if present, start empty otherwise; writes persist.
    Update,
    /// Start empty regardless of what is on disk; writes persist.
    New,
}

#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: HashMap<String, u64>,
    mode: CacheMode,
    buffered: bool,
    dirty: bool,
}

impl FileCache {
    pub fn open(path: impl Into<PathBuf>, mode: CacheMode, buffered: bool) -> Result<Self> {
        let path = path.into();
        let entries = match mode {
            CacheMode::Read | CacheMode::Write => load(&path)?,
            CacheMode::Update => {
                if path.exists() {
                    load(&path)?
                } else {
                    HashMap::new()
                }
            }
            CacheMode::New => HashMap::new(),
        };
        debug!(
            cache = %path.display(),
            entries = entries.len(),
            ?mode,
            "cache opened"
        );
        Ok(FileCache {
            path,
            entries,
            mode,
            buffered,
            dirty: false,
        })
    }

    /// Read a cache file without keeping it open, for `--input-cache`.
    pub fn load_entries(path: &Path) -> Result<HashMap<String, u64>> {
        load(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistent(&self) -> bool {
        self.mode != CacheMode::Read
    }

    fn save(&mut self) -> Result<()> {
        if !self.persistent() || !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
            }
        }
        let payload =
            serde_json::to_string(&self.entries).expect("string-to-integer map serializes");
        // Write-then-rename so an interrupted sync cannot clobber the
        // previous good file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, payload).map_err(|e| Error::file(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::file(&self.path, e))?;
        self.dirty = false;
        debug!(cache = %self.path.display(), entries = self.entries.len(), "cache synchronized");
        Ok(())
    }
}

fn load(path: &Path) -> Result<HashMap<String, u64>> {
    let raw = fs::read(path).map_err(|e| Error::file(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| Error::CacheFormat {
        path: path.to_path_buf(),
        source: e,
    })
}

impl QueryCache for FileCache {
    fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    fn put(&mut self, key: &str, amount: u64) -> Result<()> {
        self.entries.insert(key.to_string(), amount);
        self.dirty = true;
        if !self.buffered {
            self.save()?;
        }
        Ok(())
    }

    fn update(&mut self, entries: &HashMap<String, u64>) {
        for (key, amount) in entries {
            self.entries.insert(key.clone(), *amount);
        }
        self.dirty = !entries.is_empty() || self.dirty;
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    fn sync(&mut self) -> Result<()> {
        self.save()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
