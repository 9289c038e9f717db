//! Deterministic identifiers — content hashes for specs and compiled programs.
//!
//! All identity in the pipeline is content-addressed: a spec's id is the
//! BLAKE3 hash of its canonical JSON, a program's hash is the BLAKE3 hash of
//! its source bytes. Re-deriving an id from unchanged content always yields
//! the same value, which is what makes the pipeline re-entrant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque spec identifier: BLAKE3 hex of the spec's canonical JSON content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecId(pub String);

impl SpecId {
    /// Hash arbitrary content bytes into an id.
    pub fn from_content(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// Short prefix for display in reports and filenames.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash of a compiled program's source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramHash(pub String);

impl ProgramHash {
    pub fn from_source(source: &str) -> Self {
        Self(blake3::hash(source.as_bytes()).to_hex().to_string())
    }

    /// Short prefix for display in run names and logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_id_deterministic() {
        let a = SpecId::from_content(b"same bytes");
        let b = SpecId::from_content(b"same bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn spec_id_differs_on_content() {
        let a = SpecId::from_content(b"one");
        let b = SpecId::from_content(b"two");
        assert_ne!(a, b);
    }

    #[test]
    fn short_prefix() {
        let id = SpecId::from_content(b"x");
        assert_eq!(id.short().len(), 12);
    }

    #[test]
    fn program_hash_deterministic() {
        let a = ProgramHash::from_source("print(1)\n");
        let b = ProgramHash::from_source("print(1)\n");
        assert_eq!(a, b);
        assert_ne!(a, ProgramHash::from_source("print(2)\n"));
    }
}
