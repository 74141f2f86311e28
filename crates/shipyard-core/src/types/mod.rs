//! Shared core types used across the dependency, archive and idmap layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusion scope of a dependency relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Owned by the parent; packaged with it and revalidated at every occurrence.
    #[default]
    Local,
    /// Reusable definition that may be packaged once for several parents.
    Shared,
    /// Provided by the product itself; must already exist on the target.
    System,
    /// Server-level setting; must already exist on the target.
    Server,
}

impl DependencyKind {
    /// SYSTEM and SERVER dependencies are only checked for existence.
    pub fn is_existence_only(self) -> bool {
        matches!(self, Self::System | Self::Server)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Shared => "shared",
            Self::System => "system",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique (per server) key of a dependency: `<type>-<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DependencyKey {
    type_code: String,
    id: String,
}

impl DependencyKey {
    pub fn new(type_code: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_code: type_code.into(),
            id: id.into(),
        }
    }

    pub fn type_code(&self) -> &str {
        &self.type_code
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parse a key rendered by `Display`.
    ///
    /// Type codes never contain `-`, so the first dash separates type and id.
    pub fn parse(input: &str) -> Option<Self> {
        let (type_code, id) = input.split_once('-')?;
        if type_code.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(type_code, id))
    }

    /// File-system safe rendering used for persisted per-key documents.
    pub fn file_stem(&self) -> String {
        safe_file_stem(&self.to_string())
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.type_code, self.id)
    }
}

impl TryFrom<String> for DependencyKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid dependency key: {value}"))
    }
}

impl From<DependencyKey> for String {
    fn from(key: DependencyKey) -> Self {
        key.to_string()
    }
}

/// Replace characters that are unsafe in file names (`:` and separators) with `_`.
pub fn safe_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}
