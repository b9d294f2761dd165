//! Subresource-integrity digests (`sha512-<base64>`), as npm publishes them
//! in `dist.integrity`, verified with a streaming hash. Packages published
//! before SRI only carry `dist.shasum`, a SHA-1 hex digest; see
//! [`Integrity::from_shasum`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use bf_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sha1" => Some(Algorithm::Sha1),
            "sha256" => Some(Algorithm::Sha256),
            "sha384" => Some(Algorithm::Sha384),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    pub algorithm: Algorithm,
    /// Base64 digest as published.
    pub digest: String,
}

impl Integrity {
    /// Parses an SRI string. Several space-separated entries may be given;
    /// the strongest supported one wins.
    pub fn parse(sri: &str) -> Result<Self, Error> {
        let mut best: Option<Integrity> = None;
        let mut first_unsupported = None;

        for entry in sri.split_whitespace() {
            let Some((name, digest)) = entry.split_once('-') else {
                first_unsupported.get_or_insert_with(|| entry.to_string());
                continue;
            };
            // Options after '?' are reserved by the SRI grammar.
            let digest = digest.split('?').next().unwrap_or(digest);
            match Algorithm::parse(name) {
                Some(algorithm) if best.as_ref().is_none_or(|b| algorithm > b.algorithm) => {
                    best = Some(Integrity {
                        algorithm,
                        digest: digest.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    first_unsupported.get_or_insert_with(|| name.to_string());
                }
            }
        }

        best.ok_or_else(|| Error::UnsupportedDigest {
            algorithm: first_unsupported.unwrap_or_else(|| sri.to_string()),
        })
    }

    /// Wraps an npm `dist.shasum` (40 hex chars of SHA-1).
    pub fn from_shasum(shasum: &str) -> Result<Self, Error> {
        let bytes = hex::decode(shasum.trim())
            .ok()
            .filter(|b| b.len() == 20)
            .ok_or_else(|| Error::UnsupportedDigest {
                algorithm: format!("shasum '{shasum}'"),
            })?;
        Ok(Integrity {
            algorithm: Algorithm::Sha1,
            digest: STANDARD.encode(bytes),
        })
    }

    pub fn hasher(&self) -> IntegrityHasher {
        IntegrityHasher::new(self.algorithm)
    }

    pub fn verify(&self, actual: &str, file_name: Option<&str>) -> Result<(), Error> {
        if actual == self.digest {
            return Ok(());
        }
        Err(Error::ChecksumMismatch {
            expected: format!("{}-{}", self.algorithm.as_str(), self.digest),
            actual: format!("{}-{}", self.algorithm.as_str(), actual),
            file_name: file_name.map(str::to_string),
        })
    }
}

pub enum IntegrityHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl IntegrityHasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha1 => IntegrityHasher::Sha1(Sha1::new()),
            Algorithm::Sha256 => IntegrityHasher::Sha256(Sha256::new()),
            Algorithm::Sha384 => IntegrityHasher::Sha384(Sha384::new()),
            Algorithm::Sha512 => IntegrityHasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            IntegrityHasher::Sha1(h) => h.update(chunk),
            IntegrityHasher::Sha256(h) => h.update(chunk),
            IntegrityHasher::Sha384(h) => h.update(chunk),
            IntegrityHasher::Sha512(h) => h.update(chunk),
        }
    }

    /// Base64 digest, comparable with [`Integrity::digest`].
    pub fn finish(self) -> String {
        match self {
            IntegrityHasher::Sha1(h) => STANDARD.encode(h.finalize()),
            IntegrityHasher::Sha256(h) => STANDARD.encode(h.finalize()),
            IntegrityHasher::Sha384(h) => STANDARD.encode(h.finalize()),
            IntegrityHasher::Sha512(h) => STANDARD.encode(h.finalize()),
        }
    }
}

/// SRI string for `data`, used when publishing fixtures and in tests.
pub fn sri_for(algorithm: Algorithm, data: &[u8]) -> String {
    let mut hasher = IntegrityHasher::new(algorithm);
    hasher.update(data);
    format!("{}-{}", algorithm.as_str(), hasher.finish())
}
