//! Language tag handling
//!
//! Callers name languages with BCP-47 style tags ("en-US", "pt_br", "de").
//! Engines report their own tags, so both sides are normalized before they
//! are compared.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Accepts `language[-subtag...]` with either `-` or `_` as separator
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]{2,8}([-_][A-Za-z0-9]{1,8})*$").expect("language tag pattern is valid")
});

/// A normalized language tag
///
/// The primary language is lowercase, a four letter script is titlecase and
/// a two letter region is uppercase: "EN_us" becomes "en-US".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguageTag(String);

/// How closely an offered language matches a requested one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageMatch {
    /// Different primary language
    None,
    /// Same primary language, different or missing region
    Language,
    /// Identical tags
    Exact,
}

impl LanguageTag {
    /// Parse and normalize a tag
    ///
    /// Returns None for anything that is not tag-shaped, including the empty string.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if !TAG_PATTERN.is_match(tag) {
            return None;
        }

        let normalized = tag
            .split(|c| c == '-' || c == '_')
            .enumerate()
            .map(|(idx, part)| {
                if idx == 0 {
                    part.to_ascii_lowercase()
                } else if part.len() == 2 && part.chars().all(|c| c.is_ascii_alphabetic()) {
                    part.to_ascii_uppercase()
                } else if part.len() == 4 && part.chars().all(|c| c.is_ascii_alphabetic()) {
                    let mut chars = part.chars();
                    let first = chars.next().map(|c| c.to_ascii_uppercase());
                    first
                        .into_iter()
                        .chain(chars.map(|c| c.to_ascii_lowercase()))
                        .collect()
                } else {
                    part.to_ascii_lowercase()
                }
            })
            .collect::<Vec<_>>()
            .join("-");

        Some(Self(normalized))
    }

    /// Primary language subtag ("en" for "en-US")
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Full normalized tag
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare an offered tag against this requested tag
    pub fn match_against(&self, offered: &LanguageTag) -> LanguageMatch {
        if self == offered {
            LanguageMatch::Exact
        } else if self.primary() == offered.primary() {
            LanguageMatch::Language
        } else {
            LanguageMatch::None
        }
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
