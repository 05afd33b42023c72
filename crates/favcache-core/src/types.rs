//! Common types used throughout favcache

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use url::Url;

/// Name of a cache generation. Exactly one store is current at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(pub String);

impl CacheVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One `<source>` of a favorited picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A favorited image as stored under `favorites:<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    #[serde(default)]
    pub id: String,

    /// URL of the `<img>` fallback.
    #[serde(default, alias = "fallbackImageUrl", skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    #[serde(default)]
    pub sources: Vec<ImageSource>,

    #[serde(default, deserialize_with = "de_dimension", skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, deserialize_with = "de_dimension", skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl FavoriteRecord {
    /// Create a record with only a fallback image.
    pub fn new(id: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fallback: Some(fallback.into()),
            ..Default::default()
        }
    }

    /// Add a source.
    pub fn with_source(mut self, url: impl Into<String>, mime_type: Option<&str>) -> Self {
        self.sources.push(ImageSource {
            url: url.into(),
            mime_type: mime_type.map(str::to_string),
        });
        self
    }

    /// Every image URL the worker should cache: the fallback first, then
    /// each source in order. Empty URLs are skipped.
    pub fn image_urls(&self) -> Vec<String> {
        self.fallback
            .iter()
            .chain(self.sources.iter().map(|s| &s.url))
            .filter(|u| !u.is_empty())
            .cloned()
            .collect()
    }
}

/// Dimensions arrive either as numbers or as attribute strings.
fn de_dimension<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Dim {
        Num(u32),
        Text(String),
    }

    Ok(match Option::<Dim>::deserialize(deserializer)? {
        Some(Dim::Num(n)) => Some(n),
        Some(Dim::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Exact match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Contains substring.
    Contains,
}

/// Pattern matched against a request key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(key: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: key.to_string(),
        }
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self {
            pattern_type: PatternType::Suffix,
            pattern: suffix.to_string(),
        }
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::Contains,
            pattern: substring.to_string(),
        }
    }

    /// Check if a key matches this pattern.
    pub fn matches(&self, key: &str) -> bool {
        match self.pattern_type {
            PatternType::Exact => key == self.pattern,
            PatternType::Prefix => key.starts_with(&self.pattern),
            PatternType::Suffix => key.ends_with(&self.pattern),
            PatternType::Contains => key.contains(&self.pattern),
        }
    }
}

/// How a request URL becomes a cache key.
///
/// `Full` is `origin + pathname + search + hash`. Two searches that differ
/// only in parameter order get different keys under `Full`; `SortedQuery`
/// folds them together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    #[default]
    Full,
    /// Drop the query string.
    IgnoreQuery,
    /// Sort query pairs by name, then value.
    SortedQuery,
    /// Drop the fragment.
    IgnoreFragment,
}

impl KeyPolicy {
    /// Build the normalized cache key for a URL.
    pub fn key_for(&self, url: &Url) -> String {
        let mut key = url.origin().ascii_serialization();
        key.push_str(url.path());

        match self {
            KeyPolicy::IgnoreQuery => {}
            KeyPolicy::SortedQuery => {
                let mut pairs: Vec<(String, String)> = url
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                if !pairs.is_empty() {
                    pairs.sort();
                    let query = url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(pairs)
                        .finish();
                    key.push('?');
                    key.push_str(&query);
                }
            }
            KeyPolicy::Full | KeyPolicy::IgnoreFragment => {
                push_prefixed(&mut key, '?', url.query())
            }
        }

        if *self != KeyPolicy::IgnoreFragment {
            push_prefixed(&mut key, '#', url.fragment());
        }

        key
    }
}

// `search` and `hash` are empty when the component is missing or empty.
fn push_prefixed(key: &mut String, prefix: char, part: Option<&str>) {
    if let Some(part) = part.filter(|p| !p.is_empty()) {
        key.push(prefix);
        key.push_str(part);
    }
}
