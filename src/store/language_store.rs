//! Language registry backing the [`SessionStore`] trait.
//!
//! Holds one [`Language`] per owner in memory. When opened with a path,
//! the full map is rewritten as a JSON snapshot after every successful
//! registration and reloaded on startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::{Language, SessionStore};
use crate::domain::SessionKey;
use crate::error::BrokerError;

/// Owner-indexed language store with optional JSON durability.
#[derive(Debug, Default)]
pub struct LanguageStore {
    languages: RwLock<BTreeMap<u64, Language>>,
    path: Option<PathBuf>,
    /// Serializes registrations so snapshots land in commit order.
    writer: Mutex<()>,
}

impl LanguageStore {
    /// Creates an empty store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a store persisted at `path`, loading the snapshot if present.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Persistence`] if the snapshot exists but
    /// cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BrokerError> {
        let path = path.into();
        let languages = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| BrokerError::Persistence(format!("{}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| BrokerError::Persistence(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };
        tracing::info!(path = %path.display(), languages = languages.len(), "language store opened");
        Ok(Self {
            languages: RwLock::new(languages),
            path: Some(path),
            writer: Mutex::new(()),
        })
    }

    /// Registers `language` for its owner, replacing the owner's previous
    /// language. The previous language's key stops validating.
    ///
    /// Returns the replaced language, if any.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Registration`] if another owner already uses the
    ///   name or short name.
    /// - [`BrokerError::Persistence`] if the snapshot cannot be written;
    ///   the store is left unchanged.
    pub fn register_language(&self, language: Language) -> Result<Option<Language>, BrokerError> {
        let _writer = self.writer.lock();
        let next = {
            let languages = self.languages.read();
            if let Some(clash) = conflicting_name(&languages, &language) {
                return Err(BrokerError::Registration(format!(
                    "a language named `{clash}` is already registered"
                )));
            }
            self.path.as_ref().map(|_| {
                let mut next = languages.clone();
                next.insert(language.owner_id, language.clone());
                next
            })
        };

        // Written without holding the map lock.
        if let (Some(path), Some(next)) = (&self.path, &next) {
            write_snapshot(path, next)?;
        }
        Ok(self.languages.write().insert(language.owner_id, language))
    }

    /// Finds a language by name or short name.
    #[must_use]
    pub fn find_language(&self, name: &str) -> Option<Language> {
        self.languages
            .read()
            .values()
            .find(|lang| lang.answers_to(name))
            .cloned()
    }

    /// Number of registered languages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.languages.read().len()
    }

    /// Returns `true` if no language is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.languages.read().is_empty()
    }
}

impl SessionStore for LanguageStore {
    fn validate_key(&self, key: &SessionKey) -> bool {
        self.languages.read().values().any(|lang| &lang.key == key)
    }

    fn find_by_key(&self, key: &SessionKey) -> Option<Language> {
        self.languages
            .read()
            .values()
            .find(|lang| &lang.key == key)
            .cloned()
    }
}

/// Name of `language` already used by another owner, if any.
fn conflicting_name<'a>(
    languages: &BTreeMap<u64, Language>,
    language: &'a Language,
) -> Option<&'a str> {
    languages
        .values()
        .filter(|other| other.owner_id != language.owner_id)
        .find_map(|other| {
            if other.answers_to(&language.name) {
                Some(language.name.as_str())
            } else if other.answers_to(&language.short) {
                Some(language.short.as_str())
            } else {
                None
            }
        })
}

fn write_snapshot(path: &Path, languages: &BTreeMap<u64, Language>) -> Result<(), BrokerError> {
    let io_err = |e: std::io::Error| BrokerError::Persistence(format!("{}: {e}", path.display()));
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(languages)
        .map_err(|e| BrokerError::Persistence(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
