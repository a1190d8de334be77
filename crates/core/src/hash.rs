use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

use gshare_config::PIECE_SIZE;

use crate::helpers::{piece_count, piece_len};

/// Size, per-piece hashes and aggregate hash of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    pub piece_hashes: Vec<String>,
    pub file_hash: String,
}

/// Lowercase hex SHA-1 of one piece's bytes.
pub fn piece_hash(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Aggregate identity of a file: SHA-1 over the concatenation of the
/// piece-hash hex strings, not over the raw file bytes. Cheap to
/// recompute and must match on publisher and downloader.
pub fn aggregate_hash(piece_hashes: &[String]) -> String {
    let mut hasher = Sha1::new();
    for ph in piece_hashes {
        hasher.update(ph.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Hash `path` piece by piece and compute the aggregate.
pub fn digest_file(path: &Path) -> io::Result<FileDigest> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let npieces = piece_count(size);

    let mut piece_hashes = Vec::with_capacity(npieces);
    let mut buf = vec![0u8; PIECE_SIZE];
    for idx in 0..npieces {
        let len = piece_len(size, idx);
        file.read_exact(&mut buf[..len])?;
        piece_hashes.push(piece_hash(&buf[..len]));
    }

    let file_hash = aggregate_hash(&piece_hashes);
    Ok(FileDigest {
        size,
        piece_hashes,
        file_hash,
    })
}
