use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use super::Cache;
use crate::{error::GraphOpError, properties::RowId};

#[derive(Debug)]
struct Index {
    next_version: u64,
    versions: BTreeMap<RowId, u64>,
}

/// Persists each entry as `<dir>/<id>.json`.
///
/// The in-memory index is rebuilt from the directory on [`open`](DiskCache::open). Versions
/// restart after a reopen. I/O failures are logged and treated as misses.
#[derive(Debug)]
pub struct DiskCache<V> {
    dir: PathBuf,
    index: RwLock<Index>,
    _value: PhantomData<fn() -> V>,
}

impl<V> DiskCache<V> {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, GraphOpError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut versions = BTreeMap::new();
        let mut next_version = 1;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<RowId>().ok())
            else {
                tracing::debug!("[DiskCache] ignoring unrelated file {:?}", path);
                continue;
            };
            versions.insert(id, next_version);
            next_version += 1;
        }
        tracing::debug!(
            "[DiskCache] opened {:?} with {} entries",
            dir,
            versions.len()
        );
        Ok(DiskCache {
            dir,
            index: RwLock::new(Index {
                next_version,
                versions,
            }),
            _value: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: RowId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn drop_entry(&self, index: &mut Index, id: RowId) {
        index.versions.remove(&id);
        let path = self.entry_path(id);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("[DiskCache] could not remove {:?}: {}", path, e);
            }
        }
    }
}

impl<V: Serialize + DeserializeOwned> DiskCache<V> {
    fn read_entry(&self, id: RowId) -> Result<V, GraphOpError> {
        let content = fs::read_to_string(self.entry_path(id))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_entry(&self, id: RowId, value: &V) -> Result<(), GraphOpError> {
        let path = self.entry_path(id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl<V: Serialize + DeserializeOwned> Cache<V> for DiskCache<V> {
    fn get(&self, id: RowId) -> Option<V> {
        let reader = self.index.read();
        let version = *reader.versions.get(&id)?;
        match self.read_entry(id) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("[DiskCache] dropping unreadable entry {}: {}", id, e);
                drop(reader);
                self.remove_if_version(id, version);
                None
            }
        }
    }

    fn put(&self, id: RowId, value: V) -> u64 {
        let mut writer = self.index.write();
        let version = writer.next_version;
        writer.next_version += 1;
        match self.write_entry(id, &value) {
            Ok(()) => {
                writer.versions.insert(id, version);
            }
            Err(e) => {
                tracing::warn!("[DiskCache] could not store entry {}: {}", id, e);
                self.drop_entry(&mut writer, id);
            }
        }
        version
    }

    fn remove(&self, id: RowId) -> Option<V> {
        let mut writer = self.index.write();
        if !writer.versions.contains_key(&id) {
            return None;
        }
        let value = self.read_entry(id).ok();
        self.drop_entry(&mut writer, id);
        value
    }

    fn keys(&self) -> Vec<RowId> {
        self.index.read().versions.keys().copied().collect()
    }

    fn version(&self, id: RowId) -> Option<u64> {
        self.index.read().versions.get(&id).copied()
    }

    fn remove_if_version(&self, id: RowId, version: u64) -> bool {
        let mut writer = self.index.write();
        if writer.versions.get(&id) != Some(&version) {
            return false;
        }
        self.drop_entry(&mut writer, id);
        true
    }

    fn clear(&self) {
        let mut writer = self.index.write();
        for id in writer.versions.keys().copied().collect::<Vec<RowId>>() {
            self.drop_entry(&mut writer, id);
        }
    }

    fn len(&self) -> usize {
        self.index.read().versions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;
    use test_log::test;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Thumbnail {
        width: u32,
        bytes: Vec<u8>,
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let thumb = Thumbnail {
            width: 2,
            bytes: vec![1, 2, 3, 4],
        };
        {
            let cache = DiskCache::<Thumbnail>::open(dir.path()).unwrap();
            cache.put(5, thumb.clone());
            cache.put(6, thumb.clone());
            assert_eq!(cache.remove(6), Some(thumb.clone()));
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let reopened = DiskCache::<Thumbnail>::open(dir.path()).unwrap();
        assert_eq!(reopened.keys(), vec![5]);
        assert_eq!(reopened.get(5), Some(thumb));
    }

    #[test]
    fn corrupt_entries_degrade_to_misses() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::<Thumbnail>::open(dir.path()).unwrap();
        cache.put(
            9,
            Thumbnail {
                width: 1,
                bytes: vec![],
            },
        );
        std::fs::write(dir.path().join("9.json"), "{ not json").unwrap();

        assert_eq!(cache.get(9), None);
        assert!(!cache.contains(9));
        assert!(!dir.path().join("9.json").exists());
    }
}
