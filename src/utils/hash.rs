use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::api::error::UploadError;

/// Hash algorithms accepted for per-chunk checksums and whole-file digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Crc32,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Crc32 => "crc32",
        }
    }

    pub fn hasher(&self) -> Hasher {
        match self {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            other => Err(UploadError::UnsupportedChecksumAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental hasher over any supported algorithm. Cloneable so a running
/// whole-file digest can be snapshotted without consuming it.
#[derive(Clone)]
pub enum Hasher {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Crc32(crc32fast::Hasher),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Crc32(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(ctx) => ctx.compute().0.to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
        }
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Hasher::Md5(_) => "md5",
            Hasher::Sha1(_) => "sha1",
            Hasher::Sha256(_) => "sha256",
            Hasher::Crc32(_) => "crc32",
        };
        f.debug_tuple("Hasher").field(&name).finish()
    }
}

/// Compares a caller-supplied digest against raw digest bytes.
/// Clients send either hex (any case) or standard base64.
pub fn digest_matches(expected: &str, actual: &[u8]) -> bool {
    let expected = expected.trim();
    if expected.eq_ignore_ascii_case(&hex::encode(actual)) {
        return true;
    }
    BASE64
        .decode(expected)
        .map(|decoded| decoded == actual)
        .unwrap_or(false)
}

/// Same as [`digest_matches`] when the actual digest is already hex encoded.
pub fn digest_matches_hex(expected: &str, actual_hex: &str) -> bool {
    match hex::decode(actual_hex) {
        Ok(bytes) => digest_matches(expected, &bytes),
        Err(_) => false,
    }
}

pub fn calculate_hash(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Feeds a reader into a hasher until EOF, returning the hasher and the byte count.
pub async fn hash_reader<R: AsyncRead + Unpin>(
    algorithm: ChecksumAlgorithm,
    mut reader: R,
) -> std::io::Result<(Hasher, u64)> {
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((hasher, total))
}

pub async fn calculate_hash_from_reader<R: AsyncRead + Unpin>(
    algorithm: ChecksumAlgorithm,
    reader: R,
) -> std::io::Result<String> {
    let (hasher, _) = hash_reader(algorithm, reader).await?;
    Ok(hasher.finalize_hex())
}
