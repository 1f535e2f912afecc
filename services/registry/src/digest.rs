//! Content digests: `<algorithm>:<hex>` identifiers for blobs and manifests.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256, Sha512};

use crate::error::{RegistryError, RegistryResult};

/// Hash algorithms accepted in digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// SHA-256, the default for everything this registry computes.
    Sha256,
    /// SHA-512, accepted from clients.
    Sha512,
}

impl Algorithm {
    /// The algorithm prefix used in the textual digest form.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Number of hex characters in an encoded hash for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Algorithm::Sha256),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A content digest, e.g. `sha256:e3b0c442...`.
///
/// A `Digest` is only ever constructed from a syntactically valid string or by
/// hashing content, so holding one means the text is well formed. Equality is
/// exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    value: String,
}

impl Digest {
    /// Hash `data` with SHA-256.
    pub fn compute(data: &[u8]) -> Self {
        Self::compute_with(Algorithm::Sha256, data)
    }

    /// Hash `data` with a specific algorithm.
    pub fn compute_with(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut digester = Digester::new(algorithm);
        digester.update(data);
        digester.finish()
    }

    /// Whether `value` is a syntactically valid digest.
    ///
    /// Checks the algorithm prefix and the exact number of lowercase hex
    /// characters that algorithm produces. Performs no I/O.
    pub fn is_valid(value: &str) -> bool {
        Self::split(value).is_some()
    }

    /// Parse a client supplied digest.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        let (algorithm, _) =
            Self::split(value).ok_or_else(|| RegistryError::InvalidDigest(value.to_string()))?;
        Ok(Self {
            algorithm,
            value: value.to_string(),
        })
    }

    fn split(value: &str) -> Option<(Algorithm, &str)> {
        let (name, hex) = value.split_once(':')?;
        let algorithm = Algorithm::from_name(name)?;
        let valid = hex.len() == algorithm.hex_len()
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then_some((algorithm, hex))
    }

    /// The algorithm this digest was computed with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.value[self.algorithm.name().len() + 1..]
    }

    /// The full textual form.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Check that `data` hashes to this digest, using this digest's algorithm.
    pub fn verify(&self, data: &[u8]) -> RegistryResult<()> {
        let actual = Self::compute_with(self.algorithm, data);
        self.matches(&actual)
    }

    /// Compare against a computed digest, producing an integrity error on mismatch.
    pub(crate) fn matches(&self, actual: &Digest) -> RegistryResult<()> {
        if self == actual {
            Ok(())
        } else {
            Err(RegistryError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Clone)]
enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

/// Incremental digest computation, for content that arrives in pieces.
#[derive(Clone)]
pub struct Digester {
    algorithm: Algorithm,
    hasher: Hasher,
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Digester {
    /// Start hashing with `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        let hasher = match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        };
        Self { algorithm, hasher }
    }

    /// Feed more content.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Sha256(hasher) => hasher.update(data),
            Hasher::Sha512(hasher) => hasher.update(data),
        }
    }

    /// Finish hashing and produce the digest.
    pub fn finish(self) -> Digest {
        let hex = match self.hasher {
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha512(hasher) => hex::encode(hasher.finalize()),
        };
        Digest {
            algorithm: self.algorithm,
            value: format!("{}:{}", self.algorithm.name(), hex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn compute_is_deterministic() {
        let first = Digest::compute(b"hello world");
        let second = Digest::compute(b"hello world");
        assert_eq!(first, second);
        assert_ne!(first, Digest::compute(b"hello world!"));
    }

    #[test]
    fn compute_empty() {
        assert_eq!(Digest::compute(b"").as_str(), EMPTY_SHA256);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut digester = Digester::new(Algorithm::Sha256);
        digester.update(b"ab");
        digester.update(b"cd");
        assert_eq!(digester.finish(), Digest::compute(b"abcd"));
    }

    #[test]
    fn syntax_validation() {
        assert!(Digest::is_valid(EMPTY_SHA256));
        assert!(Digest::is_valid(
            Digest::compute_with(Algorithm::Sha512, b"x").as_str()
        ));

        assert!(!Digest::is_valid("sha256:abc"));
        assert!(!Digest::is_valid("latest"));
        assert!(!Digest::is_valid("md5:d41d8cd98f00b204e9800998ecf8427e"));
        assert!(!Digest::is_valid(&EMPTY_SHA256.to_uppercase()));
        assert!(!Digest::is_valid(&format!("{EMPTY_SHA256}0")));
        assert!(!Digest::is_valid(
            "sha256:zzb0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        ));
    }

    #[test]
    fn parse_exposes_parts() {
        let digest = Digest::parse(EMPTY_SHA256).unwrap();
        assert_eq!(digest.algorithm(), Algorithm::Sha256);
        assert_eq!(digest.hex().len(), 64);
        assert!(digest.hex().starts_with("e3b0"));
        assert_eq!(digest.to_string(), EMPTY_SHA256);

        let err = Digest::parse("sha256:nope").unwrap_err();
        assert_eq!(err.error_code(), "DIGEST_INVALID");
    }

    #[test]
    fn verify_uses_declared_algorithm() {
        let digest = Digest::compute_with(Algorithm::Sha512, b"payload");
        digest.verify(b"payload").unwrap();

        let err = digest.verify(b"other").unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));
    }
}
