use std::fs;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use gshare_config::PIECE_SIZE;

/// Number of pieces in a file of `size` bytes.
pub fn piece_count(size: u64) -> usize {
    ((size + PIECE_SIZE as u64 - 1) / PIECE_SIZE as u64) as usize
}

/// Length of piece `idx`: PIECE_SIZE for every piece except a shorter
/// final one.
pub fn piece_len(size: u64, idx: usize) -> usize {
    let start = idx as u64 * PIECE_SIZE as u64;
    let rest = size.saturating_sub(start);
    rest.min(PIECE_SIZE as u64) as usize
}

/// Resolve a `host:port` endpoint string to a socket address.
pub fn resolve_endpoint(endpoint: &str) -> io::Result<SocketAddr> {
    endpoint
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "endpoint did not resolve"))
}

/// Read the tracker endpoint list: one `host:port` per non-empty line.
pub fn load_tracker_list(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod unit_tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_piece_count() {
        assert_eq!(piece_count(0), 0);
        assert_eq!(piece_count(1), 1);
        assert_eq!(piece_count(PIECE_SIZE as u64), 1);
        assert_eq!(piece_count(PIECE_SIZE as u64 + 1), 2);
        assert_eq!(piece_count(600_000), 2);
    }

    #[test]
    fn test_piece_len() {
        assert_eq!(piece_len(600_000, 0), PIECE_SIZE);
        assert_eq!(piece_len(600_000, 1), 600_000 - PIECE_SIZE);
        assert_eq!(piece_len(PIECE_SIZE as u64, 0), PIECE_SIZE);
        assert_eq!(piece_len(100, 0), 100);
        // indexes past the end read as empty
        assert_eq!(piece_len(100, 1), 0);
    }

    #[test]
    fn test_resolve_endpoint() {
        let addr = resolve_endpoint("127.0.0.1:5000").unwrap();
        assert_eq!(addr.port(), 5000);
        assert!(resolve_endpoint("no-port-here").is_err());
    }

    #[test]
    fn test_load_tracker_list() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "127.0.0.1:5000").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "127.0.0.1:5001").unwrap();

        let list = load_tracker_list(f.path()).unwrap();
        assert_eq!(list, vec!["127.0.0.1:5000", "127.0.0.1:5001"]);
    }
}
