//! Durable key-value stores.
//!
//! The log only needs `put`/`get`/`delete`/`for_each` over string keys of
//! the form `<bucket>/<name>`. A write either completes or is entirely
//! absent after a crash.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use contractcourt_types::{CourtError, Result};

/// Visitor passed to [`KvStore::for_each`].
pub type Visit<'a> = &'a mut dyn FnMut(&str, &[u8]) -> Result<()>;

pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn delete(&self, key: &str) -> Result<()>;
    /// Visit every key under `bucket`, in key order.
    fn for_each(&self, bucket: &str, visit: Visit<'_>) -> Result<()>;
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    };
    match key.split_once('/') {
        Some((bucket, name)) if valid(bucket) && valid(name) => Ok((bucket, name)),
        _ => Err(CourtError::Storage(format!("invalid key {key:?}"))),
    }
}

// ---------------------------------------------------------------------------
// MemoryKvStore
// ---------------------------------------------------------------------------

/// Process-local store. Survives arbitrator restarts within one process,
/// which is what recovery tests need.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| CourtError::Storage("memory store lock poisoned".to_string()))
    }

    /// Overwrite a raw value, bypassing envelopes. Used to simulate corruption.
    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        split_key(key)?;
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn for_each(&self, bucket: &str, visit: Visit<'_>) -> Result<()> {
        let prefix = format!("{bucket}/");
        // Snapshot so the visitor may write back into the store.
        let snapshot: Vec<(String, Vec<u8>)> = self
            .entries()?
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in snapshot {
            visit(&key, &value)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileKvStore
// ---------------------------------------------------------------------------

const TMP_SUFFIX: &str = ".tmp";

/// One file per key under `root/<bucket>/<name>`. Writes go to a temp file
/// that is fsynced and renamed over the target, so a crash leaves either
/// the old or the new value.
pub struct FileKvStore {
    root: PathBuf,
    // Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileKvStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let (bucket, name) = split_key(key)?;
        Ok(self.root.join(bucket).join(name))
    }

    fn sync_dir(dir: &Path) -> Result<()> {
        // Directory fsync persists the rename on unix; elsewhere it is a no-op.
        #[cfg(unix)]
        File::open(dir)?.sync_all()?;
        #[cfg(not(unix))]
        let _ = dir;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let target = self.path(key)?;
        let dir = target
            .parent()
            .ok_or_else(|| CourtError::Storage(format!("no parent for {key}")))?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CourtError::Storage("file store lock poisoned".to_string()))?;
        fs::create_dir_all(dir)?;

        let mut tmp_name = target.as_os_str().to_owned();
        tmp_name.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp_name);
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        Self::sync_dir(dir)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CourtError::Storage("file store lock poisoned".to_string()))?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        match path.parent() {
            Some(dir) => Self::sync_dir(dir),
            None => Ok(()),
        }
    }

    fn for_each(&self, bucket: &str, visit: Visit<'_>) -> Result<()> {
        let dir = self.root.join(bucket);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            // Leftovers from a crash mid-write; the rename never happened.
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        for name in names {
            let key = format!("{bucket}/{name}");
            if let Some(value) = self.get(&key)? {
                visit(&key, &value)?;
            }
        }
        Ok(())
    }
}
