//! Session store: key validation and language identities.
//!
//! The broker only needs the two lookups of [`SessionStore`]. Minting,
//! rotating, and persisting keys live in [`LanguageStore`], which the
//! front-end service drives.

pub mod language;
pub mod language_store;

use std::fmt;

use crate::domain::SessionKey;

pub use language::Language;
pub use language_store::LanguageStore;

/// Synchronous key lookups used by the broker loop.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Returns `true` if `key` currently belongs to a language.
    fn validate_key(&self, key: &SessionKey) -> bool;

    /// Returns the language that owns `key`.
    fn find_by_key(&self, key: &SessionKey) -> Option<Language>;
}
