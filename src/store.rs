//! Flat artifact directory, abstracted so the synchronizer can run against memory in tests.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub trait ArtifactStore {
    /// File names in the store, sorted.
    fn list(&self) -> Result<Vec<String>>;
    fn exists(&self, name: &str) -> bool;
    fn read(&self, name: &str) -> Result<String>;
    fn write(&mut self, name: &str, contents: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn remove(&mut self, name: &str) -> Result<()>;
}

/// Artifacts as plain files in one directory, created on first use.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl ArtifactStore for DirStore {
    fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {}", self.dir.display()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn write(&mut self, name: &str, contents: &str) -> Result<()> {
        let path = self.path(name);
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let (src, dst) = (self.path(from), self.path(to));
        fs::rename(&src, &dst)
            .with_context(|| format!("Failed to rename {} to {}", src.display(), dst.display()))
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let path = self.path(name);
        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("SPs");
        let mut store = DirStore::open(&dir).unwrap();
        assert!(dir.is_dir());

        store.write("b.json", "{}").unwrap();
        store.write("a.crt", "cert").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a.crt".to_string(), "b.json".to_string()]);

        store.rename("b.json", "c.json").unwrap();
        assert!(!store.exists("b.json"));
        assert_eq!(store.read("c.json").unwrap(), "{}");

        store.remove("a.crt").unwrap();
        assert_eq!(store.list().unwrap(), vec!["c.json".to_string()]);
        assert!(store.remove("a.crt").is_err());
    }

    #[test]
    fn list_skips_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        let store = DirStore::open(tmp.path()).unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
