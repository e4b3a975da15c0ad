//! Key-value backends addressed by the outermost grid coordinate.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use nested_shard_common::{Coords, ShardError, ShardResult};
use rustc_hash::FxHashMap;

/// Stores one byte blob per outermost shard.
///
/// Absence is distinct from an empty blob. Implementations must not tear a
/// read-modify-write sequence of a single key.
pub trait PositionValueAccess: Send + Sync {
    fn get(&self, key: &[u64]) -> ShardResult<Option<Bytes>>;
    fn put(&self, key: &[u64], value: Bytes) -> ShardResult<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &[u64]) -> ShardResult<()>;
}

#[derive(Debug, Default)]
pub struct MemPositionStore {
    map: Mutex<FxHashMap<Coords, Bytes>>,
}

impl MemPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ShardResult<MutexGuard<'_, FxHashMap<Coords, Bytes>>> {
        self.map
            .lock()
            .map_err(|_| ShardError::Store("memory store lock poisoned".into()))
    }

    /// Read-only view for introspection. It sees through a poisoned lock;
    /// the trait methods report poisoning as [`ShardError::Store`].
    fn view(&self) -> MutexGuard<'_, FxHashMap<Coords, Bytes>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<Coords> {
        let mut keys: Vec<Coords> = self.view().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Every entry, sorted by key.
    pub fn snapshot(&self) -> Vec<(Coords, Bytes)> {
        let mut entries: Vec<(Coords, Bytes)> = self
            .view()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl PositionValueAccess for MemPositionStore {
    fn get(&self, key: &[u64]) -> ShardResult<Option<Bytes>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &[u64], value: Bytes) -> ShardResult<()> {
        self.lock()?.insert(Coords::from_slice(key), value);
        Ok(())
    }

    fn remove(&self, key: &[u64]) -> ShardResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One file per key at `root/<c0>/<c1>/…/<cn>`.
#[derive(Debug, Clone)]
pub struct FsPositionStore {
    root: PathBuf,
}

impl FsPositionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &[u64]) -> PathBuf {
        let mut path = self.root.clone();
        for c in key {
            path.push(c.to_string());
        }
        path
    }
}

impl PositionValueAccess for FsPositionStore {
    fn get(&self, key: &[u64]) -> ShardResult<Option<Bytes>> {
        match std::fs::read(self.path_of(key)) {
            Ok(data) => Ok(Some(data.into())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &[u64], value: Bytes) -> ShardResult<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &value)?;
        Ok(())
    }

    fn remove(&self, key: &[u64]) -> ShardResult<()> {
        match std::fs::remove_file(self.path_of(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn PositionValueAccess) {
        assert_eq!(store.get(&[0, 1]).unwrap(), None);
        store.put(&[0, 1], Bytes::new()).unwrap();
        // an empty blob is not absence
        assert_eq!(store.get(&[0, 1]).unwrap(), Some(Bytes::new()));
        store.put(&[0, 1], Bytes::from_static(b"abc")).unwrap();
        store.put(&[1, 0], Bytes::from_static(b"d")).unwrap();
        assert_eq!(store.get(&[0, 1]).unwrap().unwrap().as_ref(), b"abc");
        store.remove(&[0, 1]).unwrap();
        store.remove(&[0, 1]).unwrap();
        assert_eq!(store.get(&[0, 1]).unwrap(), None);
        assert_eq!(store.get(&[1, 0]).unwrap().unwrap().as_ref(), b"d");
    }

    #[test]
    fn mem_store() {
        let store = MemPositionStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys(), vec![Coords::from_slice(&[1, 0])]);
    }

    #[test]
    fn poisoned_mem_store() {
        let store = MemPositionStore::new();
        store.put(&[2], Bytes::from_static(b"x")).unwrap();
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = store.map.lock().unwrap();
                    panic!("poison");
                })
                .join();
        });
        assert!(matches!(store.get(&[2]), Err(ShardError::Store(_))));
        assert!(store.put(&[3], Bytes::new()).is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys(), vec![Coords::from_slice(&[2])]);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn fs_store() {
        let root = std::env::temp_dir().join(format!(
            "nested-shard-store-unit-{}-{}",
            std::process::id(),
            line!()
        ));
        let store = FsPositionStore::new(&root);
        assert_eq!(store.path_of(&[3, 4]), root.join("3").join("4"));
        exercise(&store);
        std::fs::remove_dir_all(&root).unwrap();
    }
}
