//! Canonical lineage keys

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Lineage, ProvenanceError};

/// Canonical string form of a [`Lineage`]
///
/// Keys are derived purely from the chain; two keys compare equal exactly
/// when their chains do.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineageKey(String);

impl LineageKey {
    /// Wrap an already-encoded key without validating it
    ///
    /// Use [`LineageKey::parse`] for untrusted text.
    #[inline]
    #[must_use]
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Validate and canonicalize encoded text
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Malformed`] if the text is not a chain.
    pub fn parse(encoded: &str) -> Result<Self, ProvenanceError> {
        let chain: Lineage = encoded.parse()?;
        Ok(chain.key())
    }

    /// Decode back into a chain
    ///
    /// # Errors
    /// Returns [`ProvenanceError::Malformed`] if the key was built from
    /// text that is not a chain.
    pub fn decode(&self) -> Result<Lineage, ProvenanceError> {
        self.0.parse()
    }

    /// Encoded form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short Blake3 digest of the key
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.0.as_bytes())
    }
}

impl From<&Lineage> for LineageKey {
    fn from(chain: &Lineage) -> Self {
        Self(chain.to_string())
    }
}

impl Display for LineageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LineageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LineageKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// First 8 bytes of the Blake3 hash of a lineage key, hex encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 8]);

impl Fingerprint {
    /// Compute from raw bytes
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        let mut short = [0u8; 8];
        short.copy_from_slice(&hash.as_bytes()[..8]);
        Self(short)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Step;

    fn chain() -> Lineage {
        Lineage::from_steps([
            Step::new("raw_T1w", "ingress").unwrap(),
            Step::new("preproc_T1w", "stageA").unwrap(),
        ])
    }

    #[test]
    fn key_round_trips() {
        let key = chain().key();
        assert_eq!(key.as_str(), r#"["raw_T1w:ingress","preproc_T1w:stageA"]"#);
        assert_eq!(key.decode().unwrap(), chain());
    }

    #[test]
    fn parse_canonicalizes_whitespace() {
        let key = LineageKey::parse(r#"[ "raw_T1w:ingress",  "preproc_T1w:stageA" ]"#).unwrap();
        assert_eq!(key, chain().key());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = chain().key().fingerprint();
        let b = chain().key().fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.to_string().len(), 16);
        let other = Lineage::from_steps([Step::new("raw_T1w", "ingress").unwrap()]).key();
        assert_ne!(other.fingerprint(), a);
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&chain().key()).unwrap();
        let back: LineageKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chain().key());
    }
}
