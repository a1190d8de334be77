use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use gshare_config::{PEER_BIND_TRIES, PEER_PORT_BASE, PEER_PORT_SPAN, PIECE_SIZE};
use gshare_core::frame::{recv_text, send_frame, send_text};
use gshare_core::helpers::{piece_count, piece_len};
use rand::Rng;

use crate::LOGGER;

/// Files this peer serves, by basename. A file enters the table on
/// upload or on a verified completed download, and leaves on stop_share
/// or logout.
pub type SharedFiles = Arc<Mutex<HashMap<String, PathBuf>>>;

pub fn new_shared_files() -> SharedFiles {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Bind the piece listener on a random port in the peer range, probing
/// up to PEER_BIND_TRIES sequential ports, and serve it on a background
/// thread. Returns the bound port.
pub fn start_piece_server(shared: SharedFiles) -> io::Result<u16> {
    let mut port = PEER_PORT_BASE + rand::thread_rng().gen_range(0..PEER_PORT_SPAN);
    for _ in 0..PEER_BIND_TRIES {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                let shared = shared.clone();
                thread::spawn(move || accept_loop(listener, shared));
                return Ok(port);
            }
            Err(_) => port = port.wrapping_add(1),
        }
    }
    Err(io::Error::new(
        ErrorKind::AddrInUse,
        "no free peer port after 40 tries",
    ))
}

fn accept_loop(listener: TcpListener, shared: SharedFiles) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let shared = shared.clone();
                thread::spawn(move || handle_request(stream, shared));
            }
            Err(e) => LOGGER.error(format!("piece server accept failed: {e}")),
        }
    }
}

/// One request per connection: `GETPIECE <filename> <idx>`. A good
/// request gets `OK`, then a 4-byte big-endian piece length and the raw
/// bytes; every failure collapses to a bare `ERR`.
fn handle_request(mut stream: TcpStream, shared: SharedFiles) {
    let request = match recv_text(&mut stream) {
        Ok(r) => r,
        Err(_) => return,
    };
    match serve_piece(&request, &shared) {
        Ok(bytes) => {
            if send_text(&mut stream, "OK").is_ok() {
                let _ = send_frame(&mut stream, &bytes);
            }
        }
        Err(e) => {
            LOGGER.debug(format!("rejecting piece request '{request}': {e}"));
            let _ = send_text(&mut stream, "ERR");
        }
    }
}

fn serve_piece(request: &str, shared: &SharedFiles) -> io::Result<Vec<u8>> {
    let tokens: Vec<&str> = request.split_whitespace().collect();
    if tokens.len() != 3 || tokens[0] != "GETPIECE" {
        return Err(io::Error::new(ErrorKind::InvalidInput, "malformed request"));
    }
    let idx: usize = tokens[2]
        .parse()
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "bad piece index"))?;

    let path = shared
        .lock()
        .unwrap()
        .get(tokens[1])
        .cloned()
        .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "file not shared"))?;

    read_piece(&path, idx)
}

/// Read piece `idx` of the file at `path`. The final piece is shorter
/// than PIECE_SIZE whenever the size is not piece-aligned.
pub fn read_piece(path: &Path, idx: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if idx >= piece_count(size) {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "piece index out of range",
        ));
    }
    let len = piece_len(size, idx);
    file.seek(SeekFrom::Start(idx as u64 * PIECE_SIZE as u64))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod unit_tests {
    use std::io::Write;

    use super::*;

    fn two_piece_file() -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&data).unwrap();
        (f, data)
    }

    #[test]
    fn test_read_piece_bounds() {
        let (f, data) = two_piece_file();
        assert_eq!(read_piece(f.path(), 0).unwrap(), &data[..PIECE_SIZE]);
        assert_eq!(read_piece(f.path(), 1).unwrap(), &data[PIECE_SIZE..]);
        assert!(read_piece(f.path(), 2).is_err());
    }
}
