//! Narrow repository abstraction over record storage.
//!
//! Services depend only on the [`Repository`] contract; the provided
//! implementation is a JSON file with atomic replace (write a temp file in
//! the same directory, then rename), so a crash mid-write never corrupts
//! the registry.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A record addressable by a stable string identifier.
pub trait Record: Serialize + DeserializeOwned + Clone {
    fn id(&self) -> &str;
}

/// get/list/put/delete over a homogeneous record collection.
pub trait Repository<T: Record> {
    fn get(&self, id: &str) -> Result<Option<T>>;
    fn list(&self) -> Result<Vec<T>>;
    /// Insert or replace by id.
    fn put(&self, record: &T) -> Result<()>;
    /// Returns false when no record with `id` existed.
    fn delete(&self, id: &str) -> Result<bool>;
}

/// File-backed repository holding one JSON array of records.
pub struct JsonRepository<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Record> JsonRepository<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn write_all(&self, records: &[T]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(records)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl<T: Record> Repository<T> for JsonRepository<T> {
    fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id() == id))
    }

    fn list(&self) -> Result<Vec<T>> {
        self.read_all()
    }

    fn put(&self, record: &T) -> Result<()> {
        let mut records = self.read_all()?;
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.write_all(&records)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.read_all()?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: String,
        value: i64,
    }

    impl Record for Item {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn repo() -> (tempfile::TempDir, JsonRepository<Item>) {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonRepository::new(dir.path().join("items.json"));
        (dir, repo)
    }

    #[test]
    fn put_get_list_delete() {
        let (_dir, repo) = repo();
        assert!(repo.list().unwrap().is_empty());

        let a = Item {
            id: "a".into(),
            value: 1,
        };
        repo.put(&a).unwrap();
        assert_eq!(repo.get("a").unwrap(), Some(a.clone()));

        // put is an upsert
        let a2 = Item {
            id: "a".into(),
            value: 2,
        };
        repo.put(&a2).unwrap();
        assert_eq!(repo.list().unwrap(), vec![a2]);

        assert!(repo.delete("a").unwrap());
        assert!(!repo.delete("a").unwrap());
        assert_eq!(repo.get("a").unwrap(), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let (_dir, repo) = repo();
        assert!(repo.get("nope").unwrap().is_none());
    }
}
