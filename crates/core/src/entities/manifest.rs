/// Peer manifest for one published file, as served by `GET_FILE_PEERS`:
///
/// ```text
/// <size> <nPieces>
/// <fileSha>
/// <pieceSha1>,<pieceSha2>,...
/// PEERS
/// <peer1>
/// <peer2>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifest {
    pub size: u64,
    pub file_hash: String,
    pub piece_hashes: Vec<String>,
    pub peers: Vec<String>,
}

impl FileManifest {
    pub fn render(&self) -> String {
        let mut out = format!("{} {}\n{}\n", self.size, self.piece_hashes.len(), self.file_hash);
        out.push_str(&self.piece_hashes.join(","));
        out.push_str("\nPEERS\n");
        for peer in &self.peers {
            out.push_str(peer);
            out.push('\n');
        }
        out
    }

    /// Parse a manifest reply. Returns None on any structural mismatch,
    /// including a piece-hash count that disagrees with the header.
    pub fn parse(text: &str) -> Option<FileManifest> {
        let mut lines = text.lines();

        let head = lines.next()?;
        let mut head_it = head.split_whitespace();
        let size: u64 = head_it.next()?.parse().ok()?;
        let npieces: usize = head_it.next()?.parse().ok()?;

        let file_hash = lines.next()?.trim().to_string();

        let piece_hashes: Vec<String> = lines
            .next()?
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
        if piece_hashes.len() != npieces {
            return None;
        }

        // Skip forward to the PEERS marker.
        loop {
            match lines.next() {
                Some("PEERS") => break,
                Some(_) => continue,
                None => return None,
            }
        }

        let peers = lines
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        Some(FileManifest {
            size,
            file_hash,
            piece_hashes,
            peers,
        })
    }
}
