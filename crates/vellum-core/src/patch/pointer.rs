//! RFC 6901 JSON Pointer parsing and formatting.
//!
//! A pointer is a sequence of reference tokens. The empty string addresses
//! the whole document; every other pointer starts with `/`. Inside a token,
//! `~1` encodes `/` and `~0` encodes `~`.

use std::fmt;

use super::PatchErrorKind;

/// A parsed JSON Pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Pointer {
    tokens: Vec<String>,
}

impl Pointer {
    /// The pointer to the whole document (`""`).
    #[must_use]
    pub const fn root() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Parse a pointer string.
    ///
    /// # Errors
    ///
    /// Returns [`PatchErrorKind::InvalidPointer`] when the string is non-empty
    /// and does not start with `/`, or contains a `~` not followed by `0`/`1`.
    pub fn parse(raw: &str) -> Result<Self, PatchErrorKind> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PatchErrorKind::InvalidPointer(raw.to_string()));
        };
        let tokens = rest
            .split('/')
            .map(|token| unescape(token).ok_or_else(|| PatchErrorKind::InvalidPointer(raw.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tokens })
    }

    /// Reference tokens, already unescaped.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Split into parent tokens and the final token. `None` for the root.
    #[must_use]
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.tokens
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }

    /// A new pointer with `token` appended.
    #[must_use]
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        Self { tokens }
    }

    /// True when `other` addresses a location strictly inside `self`.
    #[must_use]
    pub fn is_proper_prefix_of(&self, other: &Self) -> bool {
        other.tokens.len() > self.tokens.len() && other.tokens.starts_with(&self.tokens)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", escape(token))?;
        }
        Ok(())
    }
}

/// Escape a single reference token (`~` → `~0`, `/` → `~1`).
#[must_use]
pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> Option<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}
