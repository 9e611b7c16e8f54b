//! Protected-application registry.
//!
//! Persisted as a JSON array of executable names. Approval flags live only
//! in memory and start out false; a successful verification approves exactly
//! one entry.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed registry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("application not protected: {0}")]
    NotProtected(String),
    #[error("registry lock poisoned")]
    Poisoned,
}

/// One protected executable and its approval flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectedEntry {
    pub name: String,
    pub approved: bool,
}

/// Shared, mutex-guarded registry of protected executables.
#[derive(Debug)]
pub struct ProtectedRegistry {
    path: PathBuf,
    entries: Mutex<Vec<ProtectedEntry>>,
}

impl ProtectedRegistry {
    /// Load the registry from `path`. A missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries: Vec<ProtectedEntry> = read_names(&path)?
            .into_iter()
            .map(|name| ProtectedEntry { name, approved: false })
            .collect();

        tracing::info!(path = %path.display(), count = entries.len(), "protected registry loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Pick up edits made to the registry file by another process.
    ///
    /// Names still listed keep their approval flag; new names start
    /// unapproved. Returns whether the set of names changed.
    pub fn reload(&self) -> Result<bool, RegistryError> {
        let names = read_names(&self.path)?;
        let mut entries = self.lock()?;
        if entries.iter().map(|e| &e.name).eq(names.iter()) {
            return Ok(false);
        }

        let reloaded: Vec<ProtectedEntry> = names
            .into_iter()
            .map(|name| {
                let approved = entries.iter().any(|e| e.name == name && e.approved);
                ProtectedEntry { name, approved }
            })
            .collect();
        tracing::info!(
            path = %self.path.display(),
            before = entries.len(),
            after = reloaded.len(),
            "protected registry reloaded"
        );
        *entries = reloaded;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ProtectedEntry>>, RegistryError> {
        self.entries.lock().map_err(|_| RegistryError::Poisoned)
    }

    pub fn names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.lock()?.iter().map(|e| e.name.clone()).collect())
    }

    pub fn snapshot(&self) -> Result<Vec<ProtectedEntry>, RegistryError> {
        Ok(self.lock()?.clone())
    }

    pub fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.lock()?.iter().any(|e| e.name == name))
    }

    /// `Some(flag)` for protected names, `None` otherwise.
    pub fn is_approved(&self, name: &str) -> Result<Option<bool>, RegistryError> {
        Ok(self.lock()?.iter().find(|e| e.name == name).map(|e| e.approved))
    }

    /// Mark one protected application as approved.
    pub fn approve(&self, name: &str) -> Result<(), RegistryError> {
        self.set_flag(name, true)
    }

    pub fn revoke(&self, name: &str) -> Result<(), RegistryError> {
        self.set_flag(name, false)
    }

    pub fn revoke_all(&self) -> Result<(), RegistryError> {
        for entry in self.lock()?.iter_mut() {
            entry.approved = false;
        }
        Ok(())
    }

    fn set_flag(&self, name: &str, approved: bool) -> Result<(), RegistryError> {
        let mut entries = self.lock()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| RegistryError::NotProtected(name.to_string()))?;
        entry.approved = approved;
        tracing::info!(app = name, approved, "approval updated");
        Ok(())
    }

    /// Protect `name` and rewrite the registry file. Returns false if it was
    /// already protected.
    pub fn add(&self, name: &str) -> Result<bool, RegistryError> {
        let mut entries = self.lock()?;
        if entries.iter().any(|e| e.name == name) {
            return Ok(false);
        }
        entries.push(ProtectedEntry {
            name: name.to_string(),
            approved: false,
        });
        self.persist(&entries)?;
        Ok(true)
    }

    /// Stop protecting `name` and rewrite the registry file. Returns false if
    /// it was not protected.
    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn persist(&self, entries: &[ProtectedEntry]) -> Result<(), RegistryError> {
        let io = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let json = serde_json::to_string(&names).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io)
    }
}

/// Names listed in the registry file, first occurrence wins.
fn read_names(path: &Path) -> Result<Vec<String>, RegistryError> {
    let listed: Vec<String> = match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Vec::new(),
        Ok(raw) => serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut names: Vec<String> = Vec::with_capacity(listed.len());
    for name in listed {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> (tempfile::TempDir, ProtectedRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protected_data.json");
        std::fs::write(&path, serde_json::to_string(names).unwrap()).unwrap();
        let reg = ProtectedRegistry::load(&path).unwrap();
        (dir, reg)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ProtectedRegistry::load(dir.path().join("none.json")).unwrap();
        assert!(reg.names().unwrap().is_empty());
    }

    #[test]
    fn test_load_starts_unapproved() {
        let (_dir, reg) = registry_with(&["firefox", "steam"]);
        assert_eq!(reg.names().unwrap(), vec!["firefox", "steam"]);
        assert_eq!(reg.is_approved("firefox").unwrap(), Some(false));
        assert_eq!(reg.is_approved("vim").unwrap(), None);
    }

    #[test]
    fn test_approve_sets_exactly_one() {
        let (_dir, reg) = registry_with(&["firefox", "steam", "discord"]);
        reg.approve("steam").unwrap();

        let approved: Vec<_> = reg
            .snapshot()
            .unwrap()
            .into_iter()
            .filter(|e| e.approved)
            .map(|e| e.name)
            .collect();
        assert_eq!(approved, vec!["steam"]);
    }

    #[test]
    fn test_approve_unknown_fails() {
        let (_dir, reg) = registry_with(&["firefox"]);
        assert!(matches!(
            reg.approve("steam"),
            Err(RegistryError::NotProtected(_))
        ));
    }

    #[test]
    fn test_revoke_all() {
        let (_dir, reg) = registry_with(&["a", "b"]);
        reg.approve("a").unwrap();
        reg.approve("b").unwrap();
        reg.revoke_all().unwrap();
        assert!(reg.snapshot().unwrap().iter().all(|e| !e.approved));
    }

    #[test]
    fn test_add_remove_rewrite_whole_array() {
        let (dir, reg) = registry_with(&["firefox"]);
        assert!(reg.add("steam").unwrap());
        assert!(!reg.add("steam").unwrap());

        let path = dir.path().join("protected_data.json");
        let on_disk: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["firefox", "steam"]);

        assert!(reg.remove("firefox").unwrap());
        assert!(!reg.remove("firefox").unwrap());
        let on_disk: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["steam"]);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ProtectedRegistry::load(&path),
            Err(RegistryError::Parse { .. })
        ));
    }

    #[test]
    fn test_shared_across_threads() {
        let (_dir, reg) = registry_with(&["app"]);
        let reg = std::sync::Arc::new(reg);
        let writer = {
            let reg = reg.clone();
            std::thread::spawn(move || reg.approve("app").unwrap())
        };
        writer.join().unwrap();
        assert_eq!(reg.is_approved("app").unwrap(), Some(true));
    }

    #[test]
    fn test_reload_sees_other_writers_and_keeps_flags() {
        let (_dir, reg) = registry_with(&["firefox", "steam"]);
        reg.approve("firefox").unwrap();

        // A second handle on the same file, as the CLI would have
        let other = ProtectedRegistry::load(reg.path()).unwrap();
        assert!(other.add("discord").unwrap());
        assert!(other.remove("steam").unwrap());

        assert!(reg.reload().unwrap());
        assert_eq!(reg.names().unwrap(), vec!["firefox", "discord"]);
        assert_eq!(reg.is_approved("firefox").unwrap(), Some(true));
        assert_eq!(reg.is_approved("discord").unwrap(), Some(false));
        assert_eq!(reg.is_approved("steam").unwrap(), None);

        assert!(!reg.reload().unwrap());
    }

    #[test]
    fn test_reload_rejects_malformed_file() {
        let (_dir, reg) = registry_with(&["firefox"]);
        std::fs::write(reg.path(), "[\"firef").unwrap();
        assert!(matches!(reg.reload(), Err(RegistryError::Parse { .. })));
        assert_eq!(reg.names().unwrap(), vec!["firefox"]);
    }
}
