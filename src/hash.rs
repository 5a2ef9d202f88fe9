use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ocidist::Sha256Sum;
use sha2::{Digest, Sha256};

const HASH_CHUNK: usize = 64 * 1024;

/// Chunked SHA-256 of a file on disk. With `maxlen` only the leading bytes
/// are hashed, which is how blobs left over from an interrupted pull get
/// checked without a full re-read.
pub fn hash_on_disk_sha256(path: &Path, maxlen: Option<usize>) -> Result<Sha256Sum> {
    let file = File::open(path).context(format!("cannot open {:?} for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut budget = maxlen.map(|len| len as u64);
    let mut buf = vec![0u8; HASH_CHUNK];

    loop {
        let want = match budget {
            Some(0) => break,
            Some(left) => buf.len().min(left as usize),
            None => buf.len(),
        };

        let n = reader.read(&mut buf[..want]).context(format!("read failed while hashing {:?}", path.display()))?;
        if n == 0 {
            break;
        }

        hasher.update(&buf[..n]);
        if let Some(left) = &mut budget {
            *left -= n as u64;
        }
    }

    Ok(Sha256Sum::from_bytes(hasher.finalize().into()))
}
