//! core type-safe wrappers for the commit graph.

use std::fmt;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// Content hash of a commit (hex encoded SHA-256).
///
/// This makes sure we don't accidentally pass a tree ID where a commit ID
/// is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

impl CommitId {
    /// parse CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_sha256_hex(hex)?;
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// build a CommitId from a freshly computed digest
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// short form of the commit ID
    pub fn short(&self) -> &str {
        &self.0[..7]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for CommitId {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<CommitId> for String {
    fn from(id: CommitId) -> Self {
        id.0
    }
}

/// Content hash of a tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreeId(String);

impl TreeId {
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_sha256_hex(hex)?;
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TreeId {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<TreeId> for String {
    fn from(id: TreeId) -> Self {
        id.0
    }
}

pub(crate) fn validate_sha256_hex(hex: &str) -> Result<(), InvalidNameError> {
    if hex.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if hex.len() != 64 {
        return Err(InvalidNameError::InvalidHash(hex.to_string()));
    }
    if let Some((position, char)) = hex.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(InvalidNameError::InvalidCharacter { char, position });
    }
    Ok(())
}

/// A validated branch, tag or release name.
///
/// All three reference kinds share the same naming rules:
/// - 1-32 characters
/// - no control characters
/// - none of `# " ` [ ] | < > = % ~ * \ { }`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// maximum length in characters
    pub const MAX_LEN: usize = 32;

    const FORBIDDEN: &'static [char] = &[
        '#', '"', '`', '[', ']', '|', '<', '>', '=', '%', '~', '*', '\\', '{', '}',
    ];

    /// create a new RefName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        let len = name.chars().count();
        if len > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(len));
        }

        for (i, c) in name.chars().enumerate() {
            if c.is_control() || Self::FORBIDDEN.contains(&c) {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RefName {
    type Error = InvalidNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

/// Identifies one hosted database: owner plus database name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId {
    pub owner: String,
    pub database: String,
}

impl RepositoryId {
    pub fn new(owner: impl Into<String>, database: impl Into<String>) -> Result<Self, InvalidNameError> {
        let owner = owner.into();
        let database = database.into();
        Self::validate_part(&owner)?;
        Self::validate_part(&database)?;
        Ok(Self { owner, database })
    }

    /// owner and database names end up as path components in file-backed stores
    fn validate_part(part: &str) -> Result<(), InvalidNameError> {
        if part.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if part.len() > 256 {
            return Err(InvalidNameError::TooLong(part.len()));
        }
        if part == "." || part == ".." {
            return Err(InvalidNameError::InvalidPath(part.to_string()));
        }
        for (i, c) in part.chars().enumerate() {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '"' | '<' | '>' | '|' | '?' | '*') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(())
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.database)
    }
}

/// author/committer/tagger info
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// error type for invalid names and identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidHash(String),
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
            Self::InvalidHash(hash) => write!(f, "'{}' is not a 64 character SHA-256 hex string", hash),
            Self::InvalidPath(path) => write!(f, "invalid path component: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}
