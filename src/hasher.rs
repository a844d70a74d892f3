use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    io::{self, Read},
    path::Path,
    str::FromStr,
};

const READ_BUF: usize = 64 * 1024;

/// 256-bit content digests supported for baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!("unsupported hash algorithm {other:?}")),
        }
    }
}

/// Digest of one file plus the byte count actually hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub hex: String,
    pub size: u64,
}

/// Hash the full contents of `path` with a bounded read buffer.
///
/// Anything that is not a regular file is rejected before `open`, since opening
/// a FIFO for reading blocks until a writer shows up. The check is repeated on
/// the open handle in case the path was swapped in between.
pub fn hash_file(path: &Path, alg: HashAlgorithm) -> io::Result<FileDigest> {
    if !fs::metadata(path)?.is_file() {
        return Err(not_regular());
    }
    let mut f = fs::File::open(path)?;
    if !f.metadata()?.is_file() {
        return Err(not_regular());
    }

    match alg {
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            let size = pump(&mut f, |chunk| hasher.update(chunk))?;
            Ok(FileDigest { hex: format!("{:x}", hasher.finalize()), size })
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            let size = pump(&mut f, |chunk| {
                hasher.update(chunk);
            })?;
            Ok(FileDigest { hex: hasher.finalize().to_hex().to_string(), size })
        }
    }
}

/// Hex digest of an in-memory buffer; used for fixtures and expected values.
pub fn hash_bytes(bytes: &[u8], alg: HashAlgorithm) -> String {
    match alg {
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            format!("{:x}", Sha256::digest(bytes))
        }
        HashAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
    }
}

fn not_regular() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")
}

fn pump(r: &mut impl Read, mut sink: impl FnMut(&[u8])) -> io::Result<u64> {
    let mut buf = vec![0u8; READ_BUF];
    let mut total = 0u64;
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}
