//! Key value persistence trait and two simple implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};

pub trait Storage: Send + Sync {
    fn write(&self, key: &str, data: &[u8]) -> Result<()>;
    /// Returns None when key was never written.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Stores every key as separate file in specified directory.
pub struct FileStorage {
    path: String,
}

impl FileStorage {
    pub fn new(path: &str) -> Result<Self> {
        std::fs::create_dir_all(path).context(format!("creating storage directory {}", path))?;
        Ok(Self {
            path: path.to_owned(),
        })
    }

    fn key_fname(&self, key: &str) -> Result<String> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("invalid storage key {:?}", key);
        }
        Ok(format!("{}/{}.bin", self.path, key))
    }
}

impl Storage for FileStorage {
    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let fname = self.key_fname(key)?;
        std::fs::write(&fname, data).context(format!("can't write {}", fname))
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let fname = self.key_fname(key)?;
        match std::fs::read(&fname) {
            Ok(d) => Ok(Some(d)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context(format!("can't read {}", fname))),
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        map.insert(key.to_owned(), data.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self
            .data
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        Ok(map.get(key).cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_path(name: &str) -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("matd_test_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&p);
        p.to_string_lossy().to_string()
    }

    #[test]
    fn file_storage() {
        let path = test_path("storage");
        let s = FileStorage::new(&path).unwrap();
        assert_eq!(s.read("missing").unwrap(), None);
        s.write("matter_fabrics", &[1, 2, 3]).unwrap();
        assert_eq!(s.read("matter_fabrics").unwrap(), Some(vec![1, 2, 3]));
        assert!(s.write("../escape", &[1]).is_err());
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn memory_storage() {
        let s = MemoryStorage::new();
        assert_eq!(s.read("k").unwrap(), None);
        s.write("k", b"v").unwrap();
        s.write("k", b"w").unwrap();
        assert_eq!(s.read("k").unwrap(), Some(b"w".to_vec()));
    }
}
