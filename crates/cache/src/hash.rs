//! Streaming SHA-256 hashing.
//!
//! Content is hashed while it moves from a source to a destination so that
//! the digest always describes exactly the bytes that were written, and large
//! artifacts never have to be held in memory.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use thiserror::Error;

/// Buffer size used when streaming between readers and writers.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Hash([u8; 32]);

/// Error returned when parsing a hex digest fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid SHA-256 digest '{input}': {reason}")]
pub struct ParseHashError {
    input: String,
    reason: &'static str,
}

impl Sha256Hash {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex digest (case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self, ParseHashError> {
        hex.parse()
    }

    /// Hash an in-memory buffer.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Sha256Hash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = |reason| ParseHashError {
            input: s.to_string(),
            reason,
        };
        if s.len() != 64 {
            return Err(err("expected 64 hex characters"));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| err("contains non-hex characters"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Hash({})", self.to_hex())
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A writer that hashes everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Flush the inner writer and return the digest, byte count, and writer.
    pub fn finish(mut self) -> io::Result<(Sha256Hash, u64, W)> {
        self.inner.flush()?;
        let hash = Sha256Hash(self.hasher.finalize().into());
        Ok((hash, self.written, self.inner))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // Only the bytes the inner writer accepted count towards the digest.
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stream `source` into `destination`, returning the digest and length of
/// the bytes written.
pub fn copy_and_hash<R: Read, W: Write>(
    mut source: R,
    destination: W,
) -> io::Result<(Sha256Hash, u64)> {
    let mut writer = HashingWriter::new(destination);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
    }
    let (hash, written, _) = writer.finish()?;
    Ok((hash, written))
}

/// Hash everything `source` yields.
pub fn hash_reader<R: Read>(source: R) -> io::Result<Sha256Hash> {
    copy_and_hash(source, io::sink()).map(|(hash, _)| hash)
}
