//! Language identity bound to an evaluator key.

use serde::{Deserialize, Serialize};

use crate::domain::SessionKey;
use crate::error::BrokerError;

/// Shortest accepted language name.
pub const MIN_NAME_LEN: usize = 3;
/// Longest accepted language name.
pub const MAX_NAME_LEN: usize = 16;

/// A named evaluator identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// Owner of the language; each owner has at most one.
    pub owner_id: u64,
    /// Primary name, e.g. `"mylang"`.
    pub name: String,
    /// Short name or file extension, e.g. `"ml"`.
    pub short: String,
    /// Current secret key of the language's evaluator.
    pub key: SessionKey,
}

impl Language {
    /// Builds a language after validating `name` and `short`.
    ///
    /// `short` defaults to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidRequest`] if either name is not an
    /// identifier of 3 to 16 characters.
    pub fn new(
        owner_id: u64,
        name: &str,
        short: Option<&str>,
        key: SessionKey,
    ) -> Result<Self, BrokerError> {
        let short = short.unwrap_or(name);
        if !is_identifier(name) {
            return Err(BrokerError::InvalidRequest(format!(
                "language name must be an identifier `[_a-zA-Z][_a-zA-Z0-9]*` \
                 between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters long"
            )));
        }
        if !is_identifier(short) {
            return Err(BrokerError::InvalidRequest(format!(
                "language short name must be an identifier `[_a-zA-Z][_a-zA-Z0-9]*` \
                 between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters long"
            )));
        }
        Ok(Self {
            owner_id,
            name: name.to_owned(),
            short: short.to_owned(),
            key,
        })
    }

    /// Returns `true` if `name` refers to this language by either name.
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.short == name
    }
}

/// Checks `[_a-zA-Z][_a-zA-Z0-9]*` with a length of 3 to 16.
#[must_use]
pub fn is_identifier(ident: &str) -> bool {
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&ident.len()) {
        return false;
    }
    let mut chars = ident.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic());
    head_ok && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
