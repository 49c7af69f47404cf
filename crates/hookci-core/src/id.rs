//! Content-addressed entity identifiers.
//!
//! Every record is addressed by a SHA-256 digest of its logical key, so the
//! same project or commit always maps to the same id regardless of which
//! process computes it or when.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// Separator placed between the parts of a logical key before hashing.
pub const KEY_SEPARATOR: &str = "/";

const ID_LEN: usize = 64;

/// Identifier of a project, build or deploy: lowercase hex SHA-256.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Digest the given key parts joined by [`KEY_SEPARATOR`].
    pub fn digest(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(KEY_SEPARATOR.as_bytes());
            }
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines and CLI output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let valid = s.len() == ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(Error::InvalidInput(format!("malformed entity id: {s}")));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Id of the project `org/name`.
pub fn project_id(org: &str, name: &str) -> EntityId {
    EntityId::digest(&[org, name])
}

/// Id of the build of `commit_id` within a project.
pub fn build_id(project_id: &EntityId, commit_id: &str) -> EntityId {
    EntityId::digest(&[project_id.as_str(), commit_id])
}

/// Id of the deploy of a build within a project.
pub fn deploy_id(project_id: &EntityId, build_id: &EntityId) -> EntityId {
    EntityId::digest(&[project_id.as_str(), build_id.as_str()])
}
