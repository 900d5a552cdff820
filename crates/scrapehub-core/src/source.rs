use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::selector::SelectorSet;

/// Opaque key of a monitored source. Also keys the source's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A monitored page: where it lives and how to read its rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub selectors: SelectorSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload for a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub selectors: SelectorSet,
}

impl NewSource {
    /// Checks the URL parses as absolute http(s) and the selectors hold their invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        let parsed = url::Url::parse(&self.url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("unsupported url scheme: {}", parsed.scheme());
        }
        self.selectors.validate()?;
        Ok(())
    }

    pub fn into_source(self, id: SourceId, now: DateTime<Utc>) -> Source {
        Source {
            id,
            name: self.name,
            url: self.url,
            selectors: self.selectors,
            created_at: now,
            updated_at: now,
        }
    }
}
