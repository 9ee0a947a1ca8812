//! File digests used as verification hashes

use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{AuctionError, Result};

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = AuctionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(AuctionError::Validation(format!(
                "unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// Digest of everything `reader` yields.
pub fn digest<R: Read>(reader: R, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    match algorithm {
        HashAlgorithm::Md5 => digest_reader::<Md5, _>(reader),
        HashAlgorithm::Sha1 => digest_reader::<Sha1, _>(reader),
        HashAlgorithm::Sha256 => digest_reader::<Sha256, _>(reader),
        HashAlgorithm::Sha512 => digest_reader::<Sha512, _>(reader),
    }
}

/// Hex digest of a file, read in 4 KiB chunks.
pub fn file_digest(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AuctionError::NotFound(format!("file {}", path.display())),
        _ => AuctionError::Io(e),
    })?;
    Ok(hex::encode(digest(file, algorithm)?))
}
