//! String to id dictionary of a tokeniser

use std::collections::HashMap;

use crate::error::TokenisationError;
use crate::settings::Settings;

use super::{TIME_SIGNATURE_EIGHTHS, TokenId};

/// Bijective mapping between token names and their ids.
///
/// Ids are assigned densely from zero in construction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    names: Vec<String>,
    ids: HashMap<String, TokenId>,
}

impl Vocabulary {
    pub fn new(names: Vec<String>) -> Result<Self, TokenisationError> {
        let mut ids = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            if ids.insert(name.clone(), id as TokenId).is_some() {
                return Err(TokenisationError::DuplicateToken(name.clone()));
            }
        }
        Ok(Self { names, ids })
    }

    /// Build from names already known to be distinct.
    pub(crate) fn from_unique(names: Vec<String>) -> Self {
        let ids: HashMap<String, TokenId> = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as TokenId))
            .collect();
        debug_assert_eq!(ids.len(), names.len(), "vocabulary layout produced duplicate names");
        Self { names, ids }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<TokenId> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: TokenId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<TokenId>, TokenisationError> {
        tokens
            .iter()
            .map(|token| {
                let token = token.as_ref();
                self.id(token)
                    .ok_or_else(|| TokenisationError::UnknownTokenString(token.to_string()))
            })
            .collect()
    }

    pub fn decode(&self, tokens: &[TokenId]) -> Result<Vec<String>, TokenisationError> {
        tokens
            .iter()
            .map(|&id| {
                self.name(id)
                    .map(str::to_string)
                    .ok_or(TokenisationError::UnknownToken(id))
            })
            .collect()
    }
}

/// A contiguous run of ids inside a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Band {
    pub offset: TokenId,
    pub len: u32,
}

impl Band {
    pub fn contains(&self, token: TokenId) -> bool {
        self.index(token).is_some()
    }

    /// Position of `token` inside the band.
    pub fn index(&self, token: TokenId) -> Option<u32> {
        token.checked_sub(self.offset).filter(|&i| i < self.len)
    }

    pub fn id(&self, index: u32) -> TokenId {
        self.offset + index
    }

    pub fn ids(&self) -> std::ops::Range<TokenId> {
        self.offset..self.offset + self.len
    }
}

/// Appends names to a vocabulary under construction, handing out their ids.
#[derive(Debug, Default)]
pub(crate) struct LayoutBuilder {
    names: Vec<String>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control(&mut self, name: &str) -> TokenId {
        let id = self.names.len() as TokenId;
        self.names.push(name.to_string());
        id
    }

    pub fn band<I>(&mut self, names: I) -> Band
    where
        I: IntoIterator<Item = String>,
    {
        let offset = self.names.len();
        self.names.extend(names);
        Band {
            offset: offset as TokenId,
            len: (self.names.len() - offset) as u32,
        }
    }

    /// `{prefix}_01` up to `{prefix}_{max}`.
    pub fn value_band(&mut self, prefix: &str, max: u64) -> Band {
        self.band((1..=max).map(|value| format!("{prefix}_{value:02}")))
    }

    /// One token per pitch of the configured pitch range.
    pub fn pitch_band(&mut self, prefix: &str) -> Band {
        self.band(
            Settings::global()
                .pitch_range()
                .map(|pitch| format!("{prefix}_{pitch:03}")),
        )
    }

    /// Signed steps, e.g. `oct_-02`.
    pub fn signed_band(&mut self, prefix: &str, range: std::ops::RangeInclusive<i32>) -> Band {
        self.band(range.map(|step| format!("{prefix}_{step:+03}")))
    }

    pub fn time_signature_band(&mut self) -> Band {
        self.band(TIME_SIGNATURE_EIGHTHS.map(|eighths| format!("tsg_{eighths:02}_08")))
    }

    pub fn finish(self) -> Vocabulary {
        Vocabulary::from_unique(self.names)
    }
}
