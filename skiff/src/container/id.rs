//! Container identifiers.

use serde::{Deserialize, Serialize};
use skiff_shared::constants::container::{ID_BYTES, SHORT_ID_LEN};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::fmt;

/// Full container id: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    pub const LEN: usize = ID_BYTES * 2;

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let bytes: [u8; ID_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Validate and wrap an existing full id.
    pub fn parse(s: &str) -> SkiffResult<Self> {
        if s.len() != Self::LEN || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(SkiffError::InvalidArgument(format!(
                "invalid container id '{s}': expected {} lowercase hex chars",
                Self::LEN
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable prefix used in logs and by detached `run`.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LEN]
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContainerId {
    type Error = SkiffError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContainerId> for String {
    fn from(id: ContainerId) -> Self {
        id.0
    }
}
